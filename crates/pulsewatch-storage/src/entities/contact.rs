use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "contacts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub realm: String,
    pub name: String,
    pub channel_type: String,
    pub config_json: String,
    pub enabled: bool,
    /// JSON 数组，例如 ["crit","warn"]
    pub severities: String,
    pub auto_apply: bool,
    pub max_retry: Option<i32>,
    pub retry_delay_secs: Option<i64>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
