use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "triggered_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub realm: String,
    pub rule_id: String,
    pub resource: String,
    pub partition_name: String,
    pub metric_raw_name: String,
    pub metric_display_name: String,
    pub category: String,
    pub rule_snapshot: String,
    pub state_snapshot: String,
    pub triggered_value: f64,
    pub threshold: Option<f64>,
    pub severity: String,
    pub triggered_at: i64,
    pub first_triggered_at: i64,
    pub last_triggered_at: i64,
    pub notify_state: String,
    pub resolved_at: Option<i64>,
    pub resolved_value: Option<f64>,
    pub resolved_notify_state: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
