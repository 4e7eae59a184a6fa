//! Builds the template data map for one contact's batch of events.

use chrono::DateTime;
use pulsewatch_common::types::{Contact, NotifyKind, Severity, TriggeredEvent};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Realm shown when the events carry none.
pub const DEFAULT_REALM_NAME: &str = "system";

const SEVERITY_ORDER: [Severity; 3] = [Severity::Crit, Severity::Warn, Severity::Info];

fn rfc3339(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// `3725` → `1h 2m 5s`.
pub fn humanize_secs(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    let mut parts = Vec::new();
    if h > 0 {
        parts.push(format!("{h}h"));
    }
    if m > 0 {
        parts.push(format!("{m}m"));
    }
    if s > 0 || parts.is_empty() {
        parts.push(format!("{s}s"));
    }
    parts.join(" ")
}

/// Highest severity present, crit > warn > info.
pub fn highest_severity(events: &[TriggeredEvent]) -> Severity {
    events
        .iter()
        .map(|e| e.severity)
        .max()
        .unwrap_or(Severity::Info)
}

fn resource_label(e: &TriggeredEvent) -> String {
    if e.partition.is_empty() {
        e.resource.clone()
    } else {
        format!("{}/{}", e.resource, e.partition)
    }
}

fn metric_entry(e: &TriggeredEvent, kind: NotifyKind) -> Value {
    let mut entry = Map::new();
    entry.insert("metric_display_name".into(), json!(e.metric_display_name));
    entry.insert("metric_raw_name".into(), json!(e.metric_raw_name));
    entry.insert("partition_name".into(), json!(e.partition));
    entry.insert("threshold".into(), json!(e.threshold));

    let duration = match kind {
        NotifyKind::Alerting => {
            entry.insert("triggered_value".into(), json!(e.triggered_value));
            entry.insert("last_triggered_at".into(), json!(rfc3339(e.last_triggered_at)));
            e.last_triggered_at - e.first_triggered_at
        }
        NotifyKind::Resolved => {
            let resolved_at = e.resolved_at.unwrap_or(e.last_triggered_at);
            entry.insert("previous_value".into(), json!(e.triggered_value));
            entry.insert("resolved_value".into(), json!(e.resolved_value));
            entry.insert("resolved_at".into(), json!(rfc3339(resolved_at)));
            resolved_at - e.first_triggered_at
        }
    };
    if duration > 0 {
        entry.insert("duration".into(), json!(humanize_secs(duration)));
    }
    Value::Object(entry)
}

fn by_severity(events: &[TriggeredEvent], kind: NotifyKind) -> Vec<Value> {
    SEVERITY_ORDER
        .iter()
        .filter_map(|sev| {
            let group: Vec<&TriggeredEvent> =
                events.iter().filter(|e| e.severity == *sev).collect();
            if group.is_empty() {
                return None;
            }
            let mut hosts: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for e in &group {
                hosts
                    .entry(resource_label(e))
                    .or_default()
                    .push(metric_entry(e, kind));
            }
            let hosts: Vec<Value> = hosts
                .into_iter()
                .map(|(name, metrics)| {
                    json!({"resource_name": name, "count": metrics.len(), "metrics": metrics})
                })
                .collect();
            Some(json!({
                "severity": sev.as_str(),
                "severity_formatted": sev.formatted(),
                "count": group.len(),
                "hosts": hosts,
            }))
        })
        .collect()
}

fn by_host(events: &[TriggeredEvent], kind: NotifyKind) -> Vec<Value> {
    let mut sorted: Vec<&TriggeredEvent> = events.iter().collect();
    sorted.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.resource.cmp(&b.resource))
            .then_with(|| a.triggered_at.cmp(&b.triggered_at))
    });
    sorted
        .into_iter()
        .map(|e| {
            let mut entry = match metric_entry(e, kind) {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            entry.insert("id".into(), json!(e.id));
            entry.insert("resource_name".into(), json!(e.resource));
            entry.insert("severity".into(), json!(e.severity.as_str()));
            entry.insert("severity_formatted".into(), json!(e.severity.formatted()));
            entry.insert("triggered_at".into(), json!(rfc3339(e.triggered_at)));
            Value::Object(entry)
        })
        .collect()
}

/// Data for rendering one message to `contact` about `events`.
pub fn build_template_data(contact: &Contact, events: &[TriggeredEvent], kind: NotifyKind) -> Value {
    let hosts: BTreeSet<&str> = events.iter().map(|e| e.resource.as_str()).collect();
    let alerts: BTreeSet<&str> = events.iter().map(|e| e.rule_id.as_str()).collect();
    let categories: BTreeSet<&str> = events
        .iter()
        .map(|e| {
            if e.category.is_empty() {
                e.metric_raw_name.as_str()
            } else {
                e.category.as_str()
            }
        })
        .filter(|c| !c.is_empty())
        .collect();
    let realm_name = events
        .iter()
        .map(|e| e.realm.as_str())
        .find(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REALM_NAME);
    let severity = highest_severity(events);

    let mut data = json!({
        "contact": {
            "name": contact.name,
            "channel_type": contact.channel_type.as_str(),
            "realm": contact.realm,
        },
        "kind": kind.as_str(),
        "count": events.len(),
        "affected_hosts_count": hosts.len(),
        "affected_alerts_count": alerts.len(),
        "severity": severity.as_str(),
        "severity_formatted": severity.formatted(),
        "realm_name": realm_name,
        "alert_categories": categories.into_iter().collect::<Vec<_>>().join(", "),
    });

    if let Value::Object(map) = &mut data {
        match kind {
            NotifyKind::Alerting => {
                map.insert("alerts_by_severity".into(), json!(by_severity(events, kind)));
                map.insert("alerts_by_host".into(), json!(by_host(events, kind)));
            }
            NotifyKind::Resolved => {
                map.insert("resolved_alerts_count".into(), json!(events.len()));
                map.insert("resolved_by_severity".into(), json!(by_severity(events, kind)));
                map.insert("resolved_alerts_by_host".into(), json!(by_host(events, kind)));
            }
        }
    }
    data
}
