use crate::config::SeedFile;
use anyhow::{Context, Result};
use pulsewatch_common::id::next_id;
use pulsewatch_common::types::{Contact, MetricRuleDefinition, RuleTemplate};
use pulsewatch_storage::AlertStore;
use serde_json::Value;
use std::collections::HashMap;

/// Counts reported by [`apply_seed`]. Entries whose name already exists are
/// skipped, so applying the same seed twice is a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub metric_rules_created: u32,
    pub metric_rules_skipped: u32,
    pub templates_created: u32,
    pub templates_skipped: u32,
    pub contacts_created: u32,
    pub contacts_skipped: u32,
}

fn with_id(mut entry: Value) -> Value {
    if let Value::Object(map) = &mut entry {
        let missing = map.get("id").and_then(Value::as_str).map_or(true, str::is_empty);
        if missing {
            map.insert("id".to_string(), Value::String(next_id()));
        }
    }
    entry
}

fn entry_name(entry: &Value) -> &str {
    entry.get("name").and_then(Value::as_str).unwrap_or("<unnamed>")
}

/// Writes the seed's metric rules, rule templates and contacts into the
/// catalog.
///
/// A rule template may reference its metric rule by name through a
/// `metric_rule` field instead of `metric_rule_id`; the name is looked up in
/// the seed first and then in the catalog.
pub async fn apply_seed(store: &AlertStore, seed: SeedFile) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    let mut metric_ids: HashMap<String, String> = HashMap::new();

    for entry in seed.metric_rules {
        let name = entry_name(&entry).to_string();
        let def: MetricRuleDefinition = serde_json::from_value(with_id(entry))
            .with_context(|| format!("Invalid metric rule '{name}'"))?;
        if let Some(existing) = store.metric_rule_by_name(&def.name).await? {
            tracing::info!(name = %def.name, "Metric rule exists, skipping");
            metric_ids.insert(existing.name, existing.id);
            report.metric_rules_skipped += 1;
            continue;
        }
        store.insert_metric_rule(&def).await?;
        metric_ids.insert(def.name.clone(), def.id.clone());
        report.metric_rules_created += 1;
    }

    for entry in seed.rule_templates {
        let name = entry_name(&entry).to_string();
        let mut entry = with_id(entry);
        if let Value::Object(map) = &mut entry {
            if let Some(Value::String(metric_name)) = map.remove("metric_rule") {
                let id = match metric_ids.get(&metric_name) {
                    Some(id) => id.clone(),
                    None => store
                        .metric_rule_by_name(&metric_name)
                        .await?
                        .map(|d| d.id)
                        .ok_or_else(|| {
                            anyhow::anyhow!(
                                "Rule template '{name}' references unknown metric rule '{metric_name}'"
                            )
                        })?,
                };
                map.entry("metric_rule_id").or_insert(Value::String(id));
            }
        }
        let tpl: RuleTemplate = serde_json::from_value(entry)
            .with_context(|| format!("Invalid rule template '{name}'"))?;
        if store
            .rule_template_by_name(&tpl.realm, &tpl.name)
            .await?
            .is_some()
        {
            tracing::info!(realm = %tpl.realm, name = %tpl.name, "Rule template exists, skipping");
            report.templates_skipped += 1;
            continue;
        }
        store.insert_rule_template(&tpl).await?;
        report.templates_created += 1;
    }

    for entry in seed.contacts {
        let name = entry_name(&entry).to_string();
        let contact: Contact = serde_json::from_value(with_id(entry))
            .with_context(|| format!("Invalid contact '{name}'"))?;
        if store
            .contact_by_name(&contact.realm, &contact.name)
            .await?
            .is_some()
        {
            tracing::info!(realm = %contact.realm, name = %contact.name, "Contact exists, skipping");
            report.contacts_skipped += 1;
            continue;
        }
        store.insert_contact(&contact).await?;
        report.contacts_created += 1;
    }

    Ok(report)
}
