use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub realm: String,
    pub name: String,
    pub target_id: String,
    pub resource: String,
    pub partition_name: String,
    pub datasource: String,
    pub metric_rule_id: String,
    pub metric_raw_name: String,
    pub metric_display_name: String,
    pub category: String,
    pub unit: String,
    pub detection_type: String,
    pub scale: f64,
    pub operator: String,
    pub duration: String,
    pub times: i32,
    pub silence_period: String,
    pub info_threshold: Option<f64>,
    pub warn_threshold: Option<f64>,
    pub crit_threshold: Option<f64>,
    pub enabled: bool,
    pub auto_apply: bool,
    /// user / system
    pub create_type: String,
    pub created_by: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
