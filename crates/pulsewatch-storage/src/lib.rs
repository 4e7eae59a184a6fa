//! Persistence for the alert pipeline.
//!
//! The pipeline talks to storage only through the collaborator traits in this
//! module. [`store::AlertStore`] implements all of them on top of SeaORM
//! (SQLite by default); [`memory::MemoryStore`] is an in-process
//! implementation used by tests and embedded deployments.

pub mod entities;
pub mod error;
pub mod memory;
pub mod store;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use pulsewatch_common::types::{
    Contact, MetricRuleDefinition, NotifyKind, NotifyLog, NotifyState, Rule, RuleState,
    RuleTemplate, Target, TriggeredEvent,
};
use std::collections::HashSet;

pub use error::{Result, StorageError};
pub use memory::MemoryStore;
pub use store::AlertStore;

/// Rule definitions, templates and monitored targets.
#[async_trait]
pub trait RuleCatalog: Send + Sync {
    /// Every enabled rule, used to rebuild the rule cache.
    async fn all_enabled_rules(&self) -> Result<Vec<Rule>>;

    /// Enabled rules bound to the target identified by (realm, resource, partition).
    async fn rules_for_target(
        &self,
        realm: &str,
        resource: &str,
        partition: &str,
    ) -> Result<Vec<Rule>>;

    /// Enabled rules for (realm, resource) regardless of partition.
    async fn active_rules(&self, realm: &str, resource: &str) -> Result<Vec<Rule>>;

    async fn target_exists(
        &self,
        realm: &str,
        datasource: &str,
        resource: &str,
        partition: &str,
    ) -> Result<bool>;

    async fn create_target(&self, target: Target) -> Result<Target>;

    async fn create_rules(&self, rules: &[Rule]) -> Result<()>;

    /// Enabled auto-apply templates of `realm` whose datasource is empty or
    /// equal to `datasource` and whose metric definition measures `metric`.
    async fn auto_apply_templates(
        &self,
        realm: &str,
        datasource: &str,
        metric: &str,
    ) -> Result<Vec<(RuleTemplate, MetricRuleDefinition)>>;

    /// Global metric definitions whose raw metric name is `metric`.
    async fn metric_rules_by_raw_name(&self, metric: &str) -> Result<Vec<MetricRuleDefinition>>;
}

/// Rule state and triggered events.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the state for an update. Returns a fresh state with
    /// `version == 0` when the rule was never evaluated.
    async fn state_for_update(&self, rule_id: &str) -> Result<RuleState>;

    async fn get_state(&self, rule_id: &str) -> Result<Option<RuleState>>;

    /// Writes `new` if the stored row still matches `old.version`, returning
    /// the stored state (with its bumped version). Fails with
    /// [`StorageError::Conflict`] otherwise.
    async fn save_state(&self, old: &RuleState, new: &RuleState) -> Result<RuleState>;

    /// Updates only `last_check_value` of an existing row.
    async fn update_last_check_value(&self, rule_id: &str, value: f64, now: i64) -> Result<()>;

    async fn create_triggered_event(&self, event: &TriggeredEvent) -> Result<()>;

    /// Refreshes the incident columns of an open event: `last_triggered_at`,
    /// `triggered_value`, `severity`, `threshold` and `state_snapshot`.
    /// Notify states belong to the dispatcher and are left as stored.
    async fn update_triggered_event(&self, event: &TriggeredEvent) -> Result<()>;

    /// Marks an unresolved event as resolved and queues its recovery notice
    /// (`resolved_notify_state = pending`). Returns `false` when the event
    /// was already resolved.
    async fn resolve_triggered_event(
        &self,
        id: &str,
        resolved_at: i64,
        resolved_value: f64,
    ) -> Result<bool>;

    async fn get_triggered_event(&self, id: &str) -> Result<Option<TriggeredEvent>>;

    /// Latest unresolved event of a rule.
    async fn open_triggered_event(&self, rule_id: &str) -> Result<Option<TriggeredEvent>>;

    async fn triggered_events_by_ids(&self, ids: &[String]) -> Result<Vec<TriggeredEvent>>;

    /// Unresolved events in `pending`/`failed` triggered strictly before
    /// `triggered_before`.
    async fn pending_events(&self, triggered_before: i64) -> Result<Vec<TriggeredEvent>>;

    /// Events resolved at or before `now` whose resolution has not been
    /// notified (`pending`/`failed`).
    async fn resolved_unnotified(&self, now: i64) -> Result<Vec<TriggeredEvent>>;

    /// Sets the alerting or resolved notify-state of several events.
    async fn set_notify_state(
        &self,
        ids: &[String],
        kind: NotifyKind,
        state: NotifyState,
    ) -> Result<()>;
}

/// Notification attempt records.
#[async_trait]
pub trait NotifyLogStore: Send + Sync {
    async fn create_notify_log(&self, log: &NotifyLog) -> Result<()>;

    async fn update_notify_log(&self, log: &NotifyLog) -> Result<()>;

    /// Logs in state `failed` that may still be retried (not exhausted),
    /// oldest first.
    async fn failed_notify_logs(&self) -> Result<Vec<NotifyLog>>;

    /// Ids of the events referenced by any `failed` log of `kind`,
    /// exhausted ones included. Such events are left to the retry pass and
    /// never batched into a fresh notification.
    async fn failed_log_event_ids(&self, kind: NotifyKind) -> Result<HashSet<String>>;

    async fn get_notify_log(&self, id: &str) -> Result<Option<NotifyLog>>;
}

/// Notification destinations and their rule bindings.
#[async_trait]
pub trait ContactRegistry: Send + Sync {
    async fn contacts_for_rule(&self, rule_id: &str) -> Result<Vec<Contact>>;

    /// Enabled contacts of `realm` flagged for automatic binding.
    async fn auto_apply_contacts(&self, realm: &str) -> Result<Vec<Contact>>;

    async fn bind_contact_to_rule(&self, rule_id: &str, contact_id: &str) -> Result<()>;

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>>;
}
