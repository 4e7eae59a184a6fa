use async_trait::async_trait;
use pulsewatch_common::types::{
    CompareOp, DetectionType, MetricRuleDefinition, Rule, RuleTemplate, Target, Thresholds,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};

use crate::entities::{metric_rule, rule, rule_template, target};
use crate::error::Result;
use crate::store::AlertStore;
use crate::RuleCatalog;

fn thresholds(info: Option<f64>, warn: Option<f64>, crit: Option<f64>) -> Thresholds {
    Thresholds { info, warn, crit }
}

fn to_metric_rule(m: metric_rule::Model) -> Result<MetricRuleDefinition> {
    Ok(MetricRuleDefinition {
        id: m.id,
        name: m.name,
        category: m.category,
        detection_type: DetectionType::parse_lenient(&m.detection_type),
        metric_raw_name: m.metric_raw_name,
        metric_display_name: m.metric_display_name,
        unit: m.unit,
        scale: m.scale,
        operator: CompareOp::parse_lenient(&m.operator),
        duration: m.duration,
        thresholds: thresholds(m.info_threshold, m.warn_threshold, m.crit_threshold),
        match_datasource_names: serde_json::from_str(&m.match_datasource_names)?,
    })
}

fn to_template(m: rule_template::Model) -> RuleTemplate {
    RuleTemplate {
        id: m.id,
        realm: m.realm,
        name: m.name,
        datasource: m.datasource,
        metric_rule_id: m.metric_rule_id,
        thresholds: thresholds(m.info_threshold, m.warn_threshold, m.crit_threshold),
        duration: m.duration,
        times: m.times.max(0) as u32,
        silence_period: m.silence_period,
        auto_apply: m.auto_apply,
        enabled: m.enabled,
    }
}

fn to_target(m: target::Model) -> Target {
    Target {
        id: m.id,
        realm: m.realm,
        resource: m.resource,
        partition: m.partition_name,
        datasource: m.datasource,
        category: m.category,
        collection_interval: m.collection_interval,
        reporting_interval: m.reporting_interval,
        created_by: m.created_by,
        created_at: m.created_at,
    }
}

fn to_rule(m: rule::Model) -> Rule {
    Rule {
        id: m.id,
        realm: m.realm,
        name: m.name,
        target_id: m.target_id,
        resource: m.resource,
        partition: m.partition_name,
        datasource: m.datasource,
        metric_rule_id: m.metric_rule_id,
        metric_raw_name: m.metric_raw_name,
        metric_display_name: m.metric_display_name,
        category: m.category,
        unit: m.unit,
        detection_type: DetectionType::parse_lenient(&m.detection_type),
        scale: m.scale,
        operator: CompareOp::parse_lenient(&m.operator),
        duration: m.duration,
        times: m.times.max(0) as u32,
        silence_period: m.silence_period,
        thresholds: thresholds(m.info_threshold, m.warn_threshold, m.crit_threshold),
        enabled: m.enabled,
        auto_apply: m.auto_apply,
        create_type: m.create_type,
        created_by: m.created_by,
        created_at: m.created_at,
    }
}

fn rule_active_model(r: &Rule) -> rule::ActiveModel {
    rule::ActiveModel {
        id: Set(r.id.clone()),
        realm: Set(r.realm.clone()),
        name: Set(r.name.clone()),
        target_id: Set(r.target_id.clone()),
        resource: Set(r.resource.clone()),
        partition_name: Set(r.partition.clone()),
        datasource: Set(r.datasource.clone()),
        metric_rule_id: Set(r.metric_rule_id.clone()),
        metric_raw_name: Set(r.metric_raw_name.clone()),
        metric_display_name: Set(r.metric_display_name.clone()),
        category: Set(r.category.clone()),
        unit: Set(r.unit.clone()),
        detection_type: Set(r.detection_type.to_string()),
        scale: Set(r.scale),
        operator: Set(r.operator.to_string()),
        duration: Set(r.duration.clone()),
        times: Set(r.times as i32),
        silence_period: Set(r.silence_period.clone()),
        info_threshold: Set(r.thresholds.info),
        warn_threshold: Set(r.thresholds.warn),
        crit_threshold: Set(r.thresholds.crit),
        enabled: Set(r.enabled),
        auto_apply: Set(r.auto_apply),
        create_type: Set(r.create_type.clone()),
        created_by: Set(r.created_by.clone()),
        created_at: Set(r.created_at),
    }
}

impl AlertStore {
    pub async fn insert_metric_rule(&self, def: &MetricRuleDefinition) -> Result<()> {
        let am = metric_rule::ActiveModel {
            id: Set(def.id.clone()),
            name: Set(def.name.clone()),
            category: Set(def.category.clone()),
            detection_type: Set(def.detection_type.to_string()),
            metric_raw_name: Set(def.metric_raw_name.clone()),
            metric_display_name: Set(def.metric_display_name.clone()),
            unit: Set(def.unit.clone()),
            scale: Set(def.scale),
            operator: Set(def.operator.to_string()),
            duration: Set(def.duration.clone()),
            info_threshold: Set(def.thresholds.info),
            warn_threshold: Set(def.thresholds.warn),
            crit_threshold: Set(def.thresholds.crit),
            match_datasource_names: Set(serde_json::to_string(&def.match_datasource_names)?),
            created_at: Set(chrono::Utc::now().timestamp()),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    pub async fn metric_rule_by_name(&self, name: &str) -> Result<Option<MetricRuleDefinition>> {
        let model = metric_rule::Entity::find()
            .filter(metric_rule::Column::Name.eq(name))
            .one(self.db())
            .await?;
        model.map(to_metric_rule).transpose()
    }

    pub async fn insert_rule_template(&self, tpl: &RuleTemplate) -> Result<()> {
        let am = rule_template::ActiveModel {
            id: Set(tpl.id.clone()),
            realm: Set(tpl.realm.clone()),
            name: Set(tpl.name.clone()),
            datasource: Set(tpl.datasource.clone()),
            metric_rule_id: Set(tpl.metric_rule_id.clone()),
            info_threshold: Set(tpl.thresholds.info),
            warn_threshold: Set(tpl.thresholds.warn),
            crit_threshold: Set(tpl.thresholds.crit),
            duration: Set(tpl.duration.clone()),
            times: Set(tpl.times as i32),
            silence_period: Set(tpl.silence_period.clone()),
            auto_apply: Set(tpl.auto_apply),
            enabled: Set(tpl.enabled),
            created_at: Set(chrono::Utc::now().timestamp()),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    pub async fn rule_template_by_name(
        &self,
        realm: &str,
        name: &str,
    ) -> Result<Option<RuleTemplate>> {
        let model = rule_template::Entity::find()
            .filter(rule_template::Column::Realm.eq(realm))
            .filter(rule_template::Column::Name.eq(name))
            .one(self.db())
            .await?;
        Ok(model.map(to_template))
    }

    pub async fn get_rule(&self, id: &str) -> Result<Option<Rule>> {
        let model = rule::Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_rule))
    }

    pub async fn count_rules(&self) -> Result<u64> {
        Ok(rule::Entity::find().count(self.db()).await?)
    }
}

#[async_trait]
impl RuleCatalog for AlertStore {
    async fn all_enabled_rules(&self) -> Result<Vec<Rule>> {
        let rows = rule::Entity::find()
            .filter(rule::Column::Enabled.eq(true))
            .order_by_asc(rule::Column::CreatedAt)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_rule).collect())
    }

    async fn rules_for_target(
        &self,
        realm: &str,
        resource: &str,
        partition: &str,
    ) -> Result<Vec<Rule>> {
        let rows = rule::Entity::find()
            .filter(rule::Column::Realm.eq(realm))
            .filter(rule::Column::Resource.eq(resource))
            .filter(rule::Column::PartitionName.eq(partition))
            .filter(rule::Column::Enabled.eq(true))
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_rule).collect())
    }

    async fn active_rules(&self, realm: &str, resource: &str) -> Result<Vec<Rule>> {
        let rows = rule::Entity::find()
            .filter(rule::Column::Realm.eq(realm))
            .filter(rule::Column::Resource.eq(resource))
            .filter(rule::Column::Enabled.eq(true))
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_rule).collect())
    }

    async fn target_exists(
        &self,
        realm: &str,
        datasource: &str,
        resource: &str,
        partition: &str,
    ) -> Result<bool> {
        let count = target::Entity::find()
            .filter(target::Column::Realm.eq(realm))
            .filter(target::Column::Datasource.eq(datasource))
            .filter(target::Column::Resource.eq(resource))
            .filter(target::Column::PartitionName.eq(partition))
            .count(self.db())
            .await?;
        Ok(count > 0)
    }

    async fn create_target(&self, t: Target) -> Result<Target> {
        let am = target::ActiveModel {
            id: Set(t.id.clone()),
            realm: Set(t.realm.clone()),
            resource: Set(t.resource.clone()),
            partition_name: Set(t.partition.clone()),
            datasource: Set(t.datasource.clone()),
            category: Set(t.category.clone()),
            collection_interval: Set(t.collection_interval),
            reporting_interval: Set(t.reporting_interval),
            created_by: Set(t.created_by.clone()),
            created_at: Set(t.created_at),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_target(model))
    }

    async fn create_rules(&self, rules: &[Rule]) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }
        rule::Entity::insert_many(rules.iter().map(rule_active_model))
            .exec(self.db())
            .await?;
        Ok(())
    }

    async fn auto_apply_templates(
        &self,
        realm: &str,
        datasource: &str,
        metric: &str,
    ) -> Result<Vec<(RuleTemplate, MetricRuleDefinition)>> {
        let defs = self.metric_rules_by_raw_name(metric).await?;
        if defs.is_empty() {
            return Ok(Vec::new());
        }
        let def_ids: Vec<String> = defs.iter().map(|d| d.id.clone()).collect();
        let rows = rule_template::Entity::find()
            .filter(rule_template::Column::Realm.eq(realm))
            .filter(rule_template::Column::AutoApply.eq(true))
            .filter(rule_template::Column::Enabled.eq(true))
            .filter(rule_template::Column::MetricRuleId.is_in(def_ids))
            .filter(
                Condition::any()
                    .add(rule_template::Column::Datasource.eq(""))
                    .add(rule_template::Column::Datasource.eq(datasource)),
            )
            .order_by_asc(rule_template::Column::CreatedAt)
            .all(self.db())
            .await?;

        Ok(rows
            .into_iter()
            .map(to_template)
            .filter_map(|tpl| {
                defs.iter()
                    .find(|d| d.id == tpl.metric_rule_id)
                    .cloned()
                    .map(|def| (tpl, def))
            })
            .collect())
    }

    async fn metric_rules_by_raw_name(&self, metric: &str) -> Result<Vec<MetricRuleDefinition>> {
        let rows = metric_rule::Entity::find()
            .filter(metric_rule::Column::MetricRawName.eq(metric))
            .order_by_asc(metric_rule::Column::CreatedAt)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_metric_rule).collect()
    }
}
