use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rule_templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub realm: String,
    pub name: String,
    pub datasource: String,
    pub metric_rule_id: String,
    pub info_threshold: Option<f64>,
    pub warn_threshold: Option<f64>,
    pub crit_threshold: Option<f64>,
    pub duration: String,
    pub times: i32,
    pub silence_period: String,
    pub auto_apply: bool,
    pub enabled: bool,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
