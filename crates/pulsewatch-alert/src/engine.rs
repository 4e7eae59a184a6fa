use crate::bounded;
use crate::cache::{ChangeOp, RuleCache};
use crate::error::{AlertError, Result};
use crate::events::{record_outcome, EventOutcome};
use crate::lock::RuleLocks;
use crate::matcher::{normalize_keys, RuleMatcher};
use crate::state_machine::{advance, is_check_value_only};
use crate::Evaluation;
use pulsewatch_common::types::{AlertPayload, Condition, Rule};
use pulsewatch_storage::{ContactRegistry, RuleCatalog, StateStore, StorageError};
use std::sync::Arc;
use std::time::Duration;

/// Attempts per rule when the versioned state write loses a race.
const MAX_STATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct AlertEngineConfig {
    /// Provision targets and rules for unseen metric keys.
    pub auto_apply_rule: bool,
    /// Deadline of every individual storage call.
    pub call_timeout: Duration,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            auto_apply_rule: true,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Counters returned by [`AlertEngine::process_alert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub evaluated: usize,
    pub alerting: usize,
    pub resolved: usize,
    /// Rules whose state or event could not be persisted.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleOutcome {
    Quiet,
    Alerting,
    Resolved,
}

/// Entry point of the evaluation pipeline.
///
/// Owns the rule cache; every evaluator shares it through this handle.
pub struct AlertEngine {
    catalog: Arc<dyn RuleCatalog>,
    states: Arc<dyn StateStore>,
    cache: Arc<RuleCache>,
    matcher: RuleMatcher,
    locks: RuleLocks,
    call_timeout: Duration,
}

impl AlertEngine {
    pub fn new(
        catalog: Arc<dyn RuleCatalog>,
        states: Arc<dyn StateStore>,
        contacts: Arc<dyn ContactRegistry>,
        config: AlertEngineConfig,
    ) -> Self {
        let cache = Arc::new(RuleCache::new());
        let matcher = RuleMatcher::new(
            catalog.clone(),
            contacts,
            cache.clone(),
            config.auto_apply_rule,
            config.call_timeout,
        );
        Self {
            catalog,
            states,
            cache,
            matcher,
            locks: RuleLocks::new(),
            call_timeout: config.call_timeout,
        }
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// Full reload of the rule cache from the catalog.
    pub async fn rebuild_cache(&self) -> Result<usize> {
        bounded(
            self.call_timeout,
            "rebuild_cache",
            self.cache.rebuild(self.catalog.as_ref()),
        )
        .await
        .map_err(AlertError::Lookup)
    }

    /// Called by the catalog after a rule was created, updated or deleted.
    pub fn on_rule_changed(&self, rule: &Rule, op: ChangeOp) {
        tracing::debug!(rule_id = %rule.id, ?op, "Patching rule cache");
        self.cache.apply(rule, op);
    }

    /// Called by the contact registry after a contact changed. Bindings may
    /// have moved, so the whole cache is rebuilt.
    pub async fn on_contact_changed(&self, contact_id: &str, op: ChangeOp) -> Result<()> {
        tracing::debug!(contact_id, ?op, "Contact changed, rebuilding rule cache");
        self.rebuild_cache().await.map(|_| ())
    }

    pub async fn process_alert(&self, payload: &AlertPayload) -> Result<ProcessSummary> {
        self.process_alert_at(payload, chrono::Utc::now().timestamp())
            .await
    }

    /// Evaluates `payload` as of `now` (unix seconds).
    pub async fn process_alert_at(
        &self,
        payload: &AlertPayload,
        now: i64,
    ) -> Result<ProcessSummary> {
        let payload = normalize_keys(payload);
        let rules = self.matcher.resolve_rules(&payload, now).await?;
        let meta = &payload.metadata;
        let mut summary = ProcessSummary::default();

        for rule in &rules {
            let key = rule.metric_key();
            let Some(samples) = payload.data.get(&key) else {
                continue;
            };
            let eval = crate::evaluate(rule, samples);
            summary.evaluated += 1;

            match self.evaluate_rule(rule, &eval, now).await {
                Ok(RuleOutcome::Alerting) => summary.alerting += 1,
                Ok(RuleOutcome::Resolved) => summary.resolved += 1,
                Ok(RuleOutcome::Quiet) => {}
                Err(e) => {
                    summary.failed += 1;
                    let err = AlertError::Persistence {
                        rule_id: rule.id.clone(),
                        source: e,
                    };
                    tracing::error!(
                        rule_id = %rule.id,
                        realm = %meta.realm,
                        resource = %meta.resource,
                        metric = %key,
                        severity = ?eval.severity,
                        value = eval.value,
                        error = %err,
                        "Failed to persist rule evaluation"
                    );
                }
            }
        }

        tracing::debug!(
            realm = %meta.realm,
            resource = %meta.resource,
            rules = rules.len(),
            evaluated = summary.evaluated,
            alerting = summary.alerting,
            resolved = summary.resolved,
            "Payload evaluated"
        );
        Ok(summary)
    }

    /// One unit of work: advance, record the event, persist the state.
    async fn evaluate_rule(
        &self,
        rule: &Rule,
        eval: &Evaluation,
        now: i64,
    ) -> std::result::Result<RuleOutcome, StorageError> {
        let _guard = self.locks.lock(&rule.id).await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let old = bounded(
                self.call_timeout,
                "state_for_update",
                self.states.state_for_update(&rule.id),
            )
            .await?;
            let mut next = advance(&old, rule, eval, now);

            if is_check_value_only(&old, &next) {
                bounded(
                    self.call_timeout,
                    "update_last_check_value",
                    self.states
                        .update_last_check_value(&rule.id, next.last_check_value, now),
                )
                .await?;
                return Ok(RuleOutcome::Quiet);
            }

            let outcome = bounded(
                self.call_timeout,
                "record_outcome",
                record_outcome(self.states.as_ref(), rule, &mut next, now),
            )
            .await?;

            match bounded(
                self.call_timeout,
                "save_state",
                self.states.save_state(&old, &next),
            )
            .await
            {
                Ok(saved) => {
                    if let EventOutcome::Created(id) = &outcome {
                        tracing::info!(
                            rule_id = %rule.id,
                            event_id = %id,
                            resource = %rule.resource,
                            metric = %rule.metric_key(),
                            severity = ?saved.last_triggered_severity,
                            value = eval.value,
                            "Rule started alerting"
                        );
                    }
                    return Ok(match (saved.condition, outcome) {
                        (_, EventOutcome::Resolved(_)) => RuleOutcome::Resolved,
                        (Condition::Alerting, _) => RuleOutcome::Alerting,
                        _ => RuleOutcome::Quiet,
                    });
                }
                Err(e) if e.is_conflict() && attempt < MAX_STATE_ATTEMPTS => {
                    tracing::warn!(rule_id = %rule.id, attempt, "Rule state changed concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
