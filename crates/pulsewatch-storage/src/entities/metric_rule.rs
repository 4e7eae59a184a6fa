use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "metric_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub category: String,
    pub detection_type: String,
    pub metric_raw_name: String,
    pub metric_display_name: String,
    pub unit: String,
    pub scale: f64,
    pub operator: String,
    pub duration: String,
    pub info_threshold: Option<f64>,
    pub warn_threshold: Option<f64>,
    pub crit_threshold: Option<f64>,
    /// JSON 数组，空数组表示适用于所有数据源
    pub match_datasource_names: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
