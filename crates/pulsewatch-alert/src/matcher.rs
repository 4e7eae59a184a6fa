use crate::bounded;
use crate::cache::RuleCache;
use crate::error::{AlertError, Result};
use pulsewatch_common::id::next_id;
use pulsewatch_common::types::{
    normalize_metric_key, split_metric_key, AlertPayload, MetricRuleDefinition, MetricSample,
    Rule, RuleTemplate, Target,
};
use pulsewatch_storage::{ContactRegistry, RuleCatalog, StorageError};
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM: &str = "system";
const DEFAULT_DURATION: &str = "5m";
const DEFAULT_SILENCE: &str = "1h";

/// Rejects malformed payloads before anything is read or written.
pub fn validate(payload: &AlertPayload) -> Result<()> {
    let meta = &payload.metadata;
    if meta.realm.trim().is_empty() {
        return Err(AlertError::Validation("realm is required".into()));
    }
    if meta.resource.trim().is_empty() {
        return Err(AlertError::Validation("resource is required".into()));
    }
    if meta.datasource.trim().is_empty() {
        return Err(AlertError::Validation("datasource is required".into()));
    }
    if meta.timestamp == 0 {
        return Err(AlertError::Validation("timestamp is required".into()));
    }
    if payload.data.is_empty() {
        return Err(AlertError::Validation("metric data is empty".into()));
    }
    for (key, samples) in &payload.data {
        if split_metric_key(key).0.trim().is_empty() {
            return Err(AlertError::Validation(format!("metric key {key:?} has no metric name")));
        }
        if samples.is_empty() {
            return Err(AlertError::Validation(format!("metric {key} has no samples")));
        }
        for sample in samples {
            if sample.timestamp == 0 {
                return Err(AlertError::Validation(format!(
                    "metric {key} has a sample without timestamp"
                )));
            }
            if !sample.value.is_finite() {
                return Err(AlertError::Validation(format!(
                    "metric {key} has a non-finite value"
                )));
            }
        }
    }
    Ok(())
}

/// Rewrites payload keys to the form rules are indexed by, so `"cpu:"`
/// matches the rules of `"cpu"`. Samples reported under both spellings are
/// merged in timestamp order.
pub fn normalize_keys(payload: &AlertPayload) -> Cow<'_, AlertPayload> {
    if payload
        .data
        .keys()
        .all(|key| normalize_metric_key(key) == *key)
    {
        return Cow::Borrowed(payload);
    }

    let mut normalized = AlertPayload {
        metadata: payload.metadata.clone(),
        data: Default::default(),
    };
    for (key, samples) in &payload.data {
        normalized
            .data
            .entry(normalize_metric_key(key))
            .or_insert_with(Vec::new)
            .extend_from_slice(samples);
    }
    for samples in normalized.data.values_mut() {
        samples.sort_by_key(|s| s.timestamp);
    }
    Cow::Owned(normalized)
}

/// Collection and reporting interval inferred from the samples, `(0, 0)`
/// with fewer than three samples.
pub fn infer_intervals(samples: &[MetricSample]) -> (i64, i64) {
    if samples.len() < 3 {
        return (0, 0);
    }
    let mut ts: Vec<i64> = samples.iter().map(|s| s.timestamp).collect();
    ts.sort_unstable_by(|a, b| b.cmp(a));
    let newest = ts[0];
    let collection = (newest - ts[1]).abs();
    let reporting = ts.last().map(|oldest| (newest - oldest).abs()).unwrap_or(0);
    (collection, reporting)
}

fn or_default(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn base_rule(target: &Target, def: &MetricRuleDefinition, now: i64) -> Rule {
    Rule {
        id: next_id(),
        realm: target.realm.clone(),
        name: def.name.clone(),
        target_id: target.id.clone(),
        resource: target.resource.clone(),
        partition: target.partition.clone(),
        datasource: target.datasource.clone(),
        metric_rule_id: def.id.clone(),
        metric_raw_name: def.metric_raw_name.clone(),
        metric_display_name: def.metric_display_name.clone(),
        category: def.category.clone(),
        unit: def.unit.clone(),
        detection_type: def.detection_type,
        scale: def.scale,
        operator: def.operator,
        duration: or_default(&def.duration, DEFAULT_DURATION),
        times: 1,
        silence_period: DEFAULT_SILENCE.to_string(),
        thresholds: def.thresholds,
        enabled: true,
        auto_apply: false,
        create_type: SYSTEM.to_string(),
        created_by: SYSTEM.to_string(),
        created_at: now,
    }
}

/// Instantiates a rule from an auto-apply template; unset template fields
/// fall back to the metric definition, then to the built-in defaults.
pub fn rule_from_template(
    target: &Target,
    tpl: &RuleTemplate,
    def: &MetricRuleDefinition,
    now: i64,
) -> Rule {
    let mut rule = base_rule(target, def, now);
    rule.name = tpl.name.clone();
    let t = tpl.thresholds;
    if t.info.is_some() || t.warn.is_some() || t.crit.is_some() {
        rule.thresholds = t;
    }
    if !tpl.duration.trim().is_empty() {
        rule.duration = tpl.duration.clone();
    }
    rule.times = tpl.times.max(1);
    rule.silence_period = or_default(&tpl.silence_period, DEFAULT_SILENCE);
    rule
}

/// Instantiates a rule straight from a global metric definition.
pub fn rule_from_definition(target: &Target, def: &MetricRuleDefinition, now: i64) -> Rule {
    base_rule(target, def, now)
}

/// Resolves the rules a payload must be evaluated against, provisioning
/// targets and rules for metric keys seen for the first time.
pub struct RuleMatcher {
    catalog: Arc<dyn RuleCatalog>,
    contacts: Arc<dyn ContactRegistry>,
    cache: Arc<RuleCache>,
    auto_apply: bool,
    call_timeout: Duration,
}

impl RuleMatcher {
    pub fn new(
        catalog: Arc<dyn RuleCatalog>,
        contacts: Arc<dyn ContactRegistry>,
        cache: Arc<RuleCache>,
        auto_apply: bool,
        call_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            contacts,
            cache,
            auto_apply,
            call_timeout,
        }
    }

    pub async fn resolve_rules(&self, payload: &AlertPayload, now: i64) -> Result<Vec<Rule>> {
        validate(payload)?;
        let meta = &payload.metadata;

        let cached = self.cache.lookup(
            &meta.realm,
            &meta.resource,
            payload.data.keys().map(String::as_str),
        );
        if !cached.is_empty() {
            return Ok(cached);
        }

        let mut rules = Vec::new();
        let mut provisioned = false;
        for (key, samples) in &payload.data {
            let (metric, partition) = split_metric_key(key);
            if partition.is_empty() {
                tracing::warn!(realm = %meta.realm, resource = %meta.resource, metric = %key, "Metric key has no partition");
            }

            let exists = bounded(
                self.call_timeout,
                "target_exists",
                self.catalog
                    .target_exists(&meta.realm, &meta.datasource, &meta.resource, partition),
            )
            .await
            .map_err(AlertError::Lookup)?;

            if exists {
                let bound = bounded(
                    self.call_timeout,
                    "rules_for_target",
                    self.catalog
                        .rules_for_target(&meta.realm, &meta.resource, partition),
                )
                .await
                .map_err(AlertError::Lookup)?;
                rules.extend(bound);
                continue;
            }

            if !self.auto_apply {
                continue;
            }

            match self.provision(payload, metric, partition, samples, now).await {
                Ok(created) => {
                    if !created.is_empty() {
                        provisioned = true;
                    }
                    rules.extend(created);
                }
                Err(e) => {
                    tracing::error!(
                        realm = %meta.realm,
                        resource = %meta.resource,
                        metric = %key,
                        error = %e,
                        "Auto-provisioning failed, skipping metric"
                    );
                }
            }
        }

        if rules.is_empty() {
            rules = bounded(
                self.call_timeout,
                "active_rules",
                self.catalog.active_rules(&meta.realm, &meta.resource),
            )
            .await
            .map_err(AlertError::Lookup)?;
        }

        let mut seen = HashSet::new();
        rules.retain(|r| seen.insert(r.id.clone()));

        if provisioned {
            if let Err(e) = self.cache.rebuild(self.catalog.as_ref()).await {
                tracing::error!(error = %e, "Rule cache rebuild after provisioning failed");
            }
        }
        Ok(rules)
    }

    /// Creates the target of a new metric key and its rules.
    async fn provision(
        &self,
        payload: &AlertPayload,
        metric: &str,
        partition: &str,
        samples: &[MetricSample],
        now: i64,
    ) -> std::result::Result<Vec<Rule>, StorageError> {
        let meta = &payload.metadata;
        let templates = bounded(
            self.call_timeout,
            "auto_apply_templates",
            self.catalog
                .auto_apply_templates(&meta.realm, &meta.datasource, metric),
        )
        .await?;

        let definitions: Vec<MetricRuleDefinition> = if templates.is_empty() {
            bounded(
                self.call_timeout,
                "metric_rules_by_raw_name",
                self.catalog.metric_rules_by_raw_name(metric),
            )
            .await?
            .into_iter()
            .filter(|d| d.matches_datasource(&meta.datasource))
            .collect()
        } else {
            Vec::new()
        };

        let category = templates
            .first()
            .map(|(_, def)| def.category.clone())
            .or_else(|| definitions.first().map(|d| d.category.clone()))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| meta.datasource.clone());

        let (collection_interval, reporting_interval) = infer_intervals(samples);
        let target = bounded(
            self.call_timeout,
            "create_target",
            self.catalog.create_target(Target {
                id: next_id(),
                realm: meta.realm.clone(),
                resource: meta.resource.clone(),
                partition: partition.to_string(),
                datasource: meta.datasource.clone(),
                category,
                collection_interval,
                reporting_interval,
                created_by: SYSTEM.to_string(),
                created_at: now,
            }),
        )
        .await?;

        let rules: Vec<Rule> = if templates.is_empty() {
            definitions
                .iter()
                .map(|def| rule_from_definition(&target, def, now))
                .collect()
        } else {
            templates
                .iter()
                .map(|(tpl, def)| rule_from_template(&target, tpl, def, now))
                .collect()
        };

        if rules.is_empty() {
            tracing::warn!(
                realm = %meta.realm,
                resource = %meta.resource,
                datasource = %meta.datasource,
                metric,
                "No metric rule definition matches, target created without rules"
            );
            return Ok(rules);
        }

        bounded(self.call_timeout, "create_rules", self.catalog.create_rules(&rules)).await?;
        tracing::info!(
            realm = %meta.realm,
            resource = %meta.resource,
            metric,
            partition,
            rules = rules.len(),
            "Auto-provisioned rules for new target"
        );

        let contacts = bounded(
            self.call_timeout,
            "auto_apply_contacts",
            self.contacts.auto_apply_contacts(&meta.realm),
        )
        .await?;
        for rule in &rules {
            for contact in &contacts {
                if let Err(e) = bounded(
                    self.call_timeout,
                    "bind_contact_to_rule",
                    self.contacts.bind_contact_to_rule(&rule.id, &contact.id),
                )
                .await
                {
                    tracing::error!(rule_id = %rule.id, contact_id = %contact.id, error = %e, "Binding auto-apply contact failed");
                }
            }
        }
        Ok(rules)
    }
}
