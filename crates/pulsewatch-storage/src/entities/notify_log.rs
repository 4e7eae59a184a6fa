use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "notify_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub realm: String,
    /// alerting / resolved
    pub kind: String,
    pub state: String,
    pub contact_id: String,
    pub channel_type: String,
    pub contact_snapshot: String,
    /// JSON 数组
    pub triggered_event_ids: String,
    pub retry_counter: i32,
    pub last_retry_at: Option<i64>,
    pub sent_at: Option<i64>,
    pub error_detail: Option<String>,
    pub exhausted: bool,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
