//! In-process storage backend.
//!
//! Holds every table in a single mutex-guarded struct. Used by the pipeline
//! tests and by deployments that embed the alert engine without a database.

use async_trait::async_trait;
use pulsewatch_common::types::{
    Contact, MetricRuleDefinition, NotifyKind, NotifyLog, NotifyState, Rule, RuleState,
    RuleTemplate, Target, TriggeredEvent,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, StorageError};
use crate::{ContactRegistry, NotifyLogStore, RuleCatalog, StateStore};

#[derive(Default)]
struct Tables {
    metric_rules: Vec<MetricRuleDefinition>,
    templates: Vec<RuleTemplate>,
    targets: Vec<Target>,
    rules: Vec<Rule>,
    states: HashMap<String, RuleState>,
    events: BTreeMap<String, TriggeredEvent>,
    contacts: Vec<Contact>,
    bindings: HashSet<(String, String)>,
    notify_logs: BTreeMap<String, NotifyLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_state_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every subsequent rule-state write fail, to exercise the
    /// persistence-failure path.
    pub fn fail_state_writes(&self, fail: bool) {
        self.fail_state_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_state_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Other("state writes disabled".to_string()));
        }
        Ok(())
    }

    pub fn insert_metric_rule(&self, def: MetricRuleDefinition) {
        self.tables().metric_rules.push(def);
    }

    pub fn insert_rule_template(&self, tpl: RuleTemplate) {
        self.tables().templates.push(tpl);
    }

    pub fn insert_contact(&self, contact: Contact) {
        self.tables().contacts.push(contact);
    }

    pub fn insert_rule(&self, rule: Rule) {
        self.tables().rules.push(rule);
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.tables().rules.clone()
    }

    pub fn targets(&self) -> Vec<Target> {
        self.tables().targets.clone()
    }

    pub fn events(&self) -> Vec<TriggeredEvent> {
        self.tables().events.values().cloned().collect()
    }

    pub fn notify_logs(&self) -> Vec<NotifyLog> {
        self.tables().notify_logs.values().cloned().collect()
    }

    pub fn bound_contacts(&self, rule_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tables()
            .bindings
            .iter()
            .filter(|(r, _)| r == rule_id)
            .map(|(_, c)| c.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl RuleCatalog for MemoryStore {
    async fn all_enabled_rules(&self) -> Result<Vec<Rule>> {
        Ok(self
            .tables()
            .rules
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn rules_for_target(
        &self,
        realm: &str,
        resource: &str,
        partition: &str,
    ) -> Result<Vec<Rule>> {
        Ok(self
            .tables()
            .rules
            .iter()
            .filter(|r| {
                r.enabled && r.realm == realm && r.resource == resource && r.partition == partition
            })
            .cloned()
            .collect())
    }

    async fn active_rules(&self, realm: &str, resource: &str) -> Result<Vec<Rule>> {
        Ok(self
            .tables()
            .rules
            .iter()
            .filter(|r| r.enabled && r.realm == realm && r.resource == resource)
            .cloned()
            .collect())
    }

    async fn target_exists(
        &self,
        realm: &str,
        datasource: &str,
        resource: &str,
        partition: &str,
    ) -> Result<bool> {
        Ok(self.tables().targets.iter().any(|t| {
            t.realm == realm
                && t.datasource == datasource
                && t.resource == resource
                && t.partition == partition
        }))
    }

    async fn create_target(&self, target: Target) -> Result<Target> {
        let mut tables = self.tables();
        let duplicate = tables.targets.iter().any(|t| {
            t.realm == target.realm
                && t.datasource == target.datasource
                && t.resource == target.resource
                && t.partition == target.partition
        });
        if duplicate {
            return Err(StorageError::Conflict {
                entity: "target",
                id: target.id,
            });
        }
        tables.targets.push(target.clone());
        Ok(target)
    }

    async fn create_rules(&self, rules: &[Rule]) -> Result<()> {
        self.tables().rules.extend_from_slice(rules);
        Ok(())
    }

    async fn auto_apply_templates(
        &self,
        realm: &str,
        datasource: &str,
        metric: &str,
    ) -> Result<Vec<(RuleTemplate, MetricRuleDefinition)>> {
        let tables = self.tables();
        Ok(tables
            .templates
            .iter()
            .filter(|t| {
                t.realm == realm
                    && t.auto_apply
                    && t.enabled
                    && (t.datasource.is_empty() || t.datasource == datasource)
            })
            .filter_map(|t| {
                tables
                    .metric_rules
                    .iter()
                    .find(|d| d.id == t.metric_rule_id && d.metric_raw_name == metric)
                    .map(|d| (t.clone(), d.clone()))
            })
            .collect())
    }

    async fn metric_rules_by_raw_name(&self, metric: &str) -> Result<Vec<MetricRuleDefinition>> {
        Ok(self
            .tables()
            .metric_rules
            .iter()
            .filter(|d| d.metric_raw_name == metric)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn state_for_update(&self, rule_id: &str) -> Result<RuleState> {
        Ok(self
            .tables()
            .states
            .get(rule_id)
            .cloned()
            .unwrap_or_else(|| RuleState::new(rule_id)))
    }

    async fn get_state(&self, rule_id: &str) -> Result<Option<RuleState>> {
        Ok(self.tables().states.get(rule_id).cloned())
    }

    async fn save_state(&self, old: &RuleState, new: &RuleState) -> Result<RuleState> {
        self.check_writable()?;
        let mut tables = self.tables();
        let current = tables.states.get(&new.rule_id).map(|s| s.version).unwrap_or(0);
        if current != old.version {
            return Err(StorageError::Conflict {
                entity: "rule_state",
                id: new.rule_id.clone(),
            });
        }
        let mut stored = new.clone();
        stored.version = old.version + 1;
        tables.states.insert(stored.rule_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update_last_check_value(&self, rule_id: &str, value: f64, now: i64) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        let state = tables
            .states
            .get_mut(rule_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "rule_state",
                id: rule_id.to_string(),
            })?;
        state.last_check_value = value;
        state.updated_at = now;
        Ok(())
    }

    async fn create_triggered_event(&self, event: &TriggeredEvent) -> Result<()> {
        self.tables()
            .events
            .insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn update_triggered_event(&self, event: &TriggeredEvent) -> Result<()> {
        let mut tables = self.tables();
        match tables.events.get_mut(&event.id) {
            Some(slot) => {
                slot.last_triggered_at = event.last_triggered_at;
                slot.triggered_value = event.triggered_value;
                slot.severity = event.severity;
                slot.threshold = event.threshold;
                slot.state_snapshot = event.state_snapshot.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "triggered_event",
                id: event.id.clone(),
            }),
        }
    }

    async fn resolve_triggered_event(
        &self,
        id: &str,
        resolved_at: i64,
        resolved_value: f64,
    ) -> Result<bool> {
        let mut tables = self.tables();
        let slot = tables
            .events
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "triggered_event",
                id: id.to_string(),
            })?;
        if slot.is_resolved() {
            return Ok(false);
        }
        slot.resolved_at = Some(resolved_at);
        slot.resolved_value = Some(resolved_value);
        slot.resolved_notify_state = Some(NotifyState::Pending);
        Ok(true)
    }

    async fn get_triggered_event(&self, id: &str) -> Result<Option<TriggeredEvent>> {
        Ok(self.tables().events.get(id).cloned())
    }

    async fn open_triggered_event(&self, rule_id: &str) -> Result<Option<TriggeredEvent>> {
        Ok(self
            .tables()
            .events
            .values()
            .filter(|e| e.rule_id == rule_id && !e.is_resolved())
            .max_by_key(|e| e.triggered_at)
            .cloned())
    }

    async fn triggered_events_by_ids(&self, ids: &[String]) -> Result<Vec<TriggeredEvent>> {
        let tables = self.tables();
        Ok(ids
            .iter()
            .filter_map(|id| tables.events.get(id).cloned())
            .collect())
    }

    async fn pending_events(&self, triggered_before: i64) -> Result<Vec<TriggeredEvent>> {
        let mut events: Vec<TriggeredEvent> = self
            .tables()
            .events
            .values()
            .filter(|e| {
                matches!(e.notify_state, NotifyState::Pending | NotifyState::Failed)
                    && e.triggered_at < triggered_before
                    && !e.is_resolved()
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.triggered_at);
        Ok(events)
    }

    async fn resolved_unnotified(&self, now: i64) -> Result<Vec<TriggeredEvent>> {
        let mut events: Vec<TriggeredEvent> = self
            .tables()
            .events
            .values()
            .filter(|e| {
                e.resolved_at.is_some_and(|at| at <= now)
                    && matches!(
                        e.resolved_notify_state,
                        Some(NotifyState::Pending | NotifyState::Failed)
                    )
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.resolved_at);
        Ok(events)
    }

    async fn set_notify_state(
        &self,
        ids: &[String],
        kind: NotifyKind,
        state: NotifyState,
    ) -> Result<()> {
        let mut tables = self.tables();
        for id in ids {
            if let Some(event) = tables.events.get_mut(id) {
                match kind {
                    NotifyKind::Alerting => event.notify_state = state,
                    NotifyKind::Resolved => event.resolved_notify_state = Some(state),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NotifyLogStore for MemoryStore {
    async fn create_notify_log(&self, log: &NotifyLog) -> Result<()> {
        self.tables()
            .notify_logs
            .insert(log.id.clone(), log.clone());
        Ok(())
    }

    async fn update_notify_log(&self, log: &NotifyLog) -> Result<()> {
        let mut tables = self.tables();
        match tables.notify_logs.get_mut(&log.id) {
            Some(slot) => {
                *slot = log.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "notify_log",
                id: log.id.clone(),
            }),
        }
    }

    async fn failed_notify_logs(&self) -> Result<Vec<NotifyLog>> {
        let mut logs: Vec<NotifyLog> = self
            .tables()
            .notify_logs
            .values()
            .filter(|l| l.state == NotifyState::Failed && !l.exhausted)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.created_at);
        Ok(logs)
    }

    async fn failed_log_event_ids(&self, kind: NotifyKind) -> Result<HashSet<String>> {
        Ok(self
            .tables()
            .notify_logs
            .values()
            .filter(|l| l.state == NotifyState::Failed && l.kind == kind)
            .flat_map(|l| l.triggered_event_ids.iter().cloned())
            .collect())
    }

    async fn get_notify_log(&self, id: &str) -> Result<Option<NotifyLog>> {
        Ok(self.tables().notify_logs.get(id).cloned())
    }
}

#[async_trait]
impl ContactRegistry for MemoryStore {
    async fn contacts_for_rule(&self, rule_id: &str) -> Result<Vec<Contact>> {
        let tables = self.tables();
        Ok(tables
            .contacts
            .iter()
            .filter(|c| {
                tables
                    .bindings
                    .contains(&(rule_id.to_string(), c.id.clone()))
            })
            .cloned()
            .collect())
    }

    async fn auto_apply_contacts(&self, realm: &str) -> Result<Vec<Contact>> {
        Ok(self
            .tables()
            .contacts
            .iter()
            .filter(|c| c.realm == realm && c.enabled && c.auto_apply)
            .cloned()
            .collect())
    }

    async fn bind_contact_to_rule(&self, rule_id: &str, contact_id: &str) -> Result<()> {
        self.tables()
            .bindings
            .insert((rule_id.to_string(), contact_id.to_string()));
        Ok(())
    }

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>> {
        Ok(self.tables().contacts.iter().find(|c| c.id == id).cloned())
    }
}
