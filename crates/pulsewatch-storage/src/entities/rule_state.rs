use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rule_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub rule_id: String,
    pub condition: String,
    pub last_check_value: f64,
    pub last_triggered_value: Option<f64>,
    pub last_triggered_severity: Option<String>,
    pub last_triggered_at: Option<i64>,
    pub first_triggered_at: Option<i64>,
    pub notify_counter: i32,
    pub silence_start: Option<i64>,
    pub silence_end: Option<i64>,
    pub contact_state: String,
    pub triggered_event_id: Option<String>,
    /// 乐观锁版本号，每次写入 +1
    pub version: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
