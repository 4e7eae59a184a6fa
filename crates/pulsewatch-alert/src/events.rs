use pulsewatch_common::id::next_id;
use pulsewatch_common::types::{
    Condition, ContactState, NotifyState, Rule, RuleState, Severity, TriggeredEvent,
};
use pulsewatch_storage::{Result, StateStore};

/// What [`record_outcome`] did with the rule's incident.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Created(String),
    Updated(String),
    Resolved(String),
    Skipped,
}

/// Opens, extends or closes the triggered event of a rule after `state` has
/// been advanced. Mutates `state.triggered_event_id` to match; the caller
/// persists the state afterwards.
pub async fn record_outcome(
    store: &dyn StateStore,
    rule: &Rule,
    state: &mut RuleState,
    now: i64,
) -> Result<EventOutcome> {
    match state.condition {
        Condition::Alerting => {
            // 静默窗口由更早的评估打开时，事件已在上游被抑制
            let suppressed = state.contact_state == ContactState::Silenced
                && state.in_silence(now)
                && state.silence_start.is_some_and(|start| start < now);
            if suppressed {
                return Ok(EventOutcome::Skipped);
            }

            match open_event(store, state).await? {
                Some(mut event) => {
                    event.last_triggered_at = now;
                    if let Some(value) = state.last_triggered_value {
                        event.triggered_value = value;
                    }
                    if let Some(severity) = state.last_triggered_severity {
                        event.severity = severity;
                        event.threshold = rule.thresholds.get(severity);
                    }
                    event.state_snapshot = serde_json::to_value(&*state)?;
                    store.update_triggered_event(&event).await?;
                    state.triggered_event_id = Some(event.id.clone());
                    Ok(EventOutcome::Updated(event.id))
                }
                None => {
                    let event = new_event(rule, state, now)?;
                    store.create_triggered_event(&event).await?;
                    state.triggered_event_id = Some(event.id.clone());
                    Ok(EventOutcome::Created(event.id))
                }
            }
        }
        Condition::Resolved => match open_event(store, state).await? {
            Some(event) => {
                store
                    .resolve_triggered_event(&event.id, now, state.last_check_value)
                    .await?;
                state.triggered_event_id = None;
                Ok(EventOutcome::Resolved(event.id))
            }
            None => {
                state.triggered_event_id = None;
                Ok(EventOutcome::Skipped)
            }
        },
        Condition::Normal => Ok(EventOutcome::Skipped),
    }
}

async fn open_event(store: &dyn StateStore, state: &RuleState) -> Result<Option<TriggeredEvent>> {
    if let Some(id) = state.triggered_event_id.as_deref() {
        if let Some(event) = store.get_triggered_event(id).await? {
            if !event.is_resolved() {
                return Ok(Some(event));
            }
        }
    }
    store.open_triggered_event(&state.rule_id).await
}

fn new_event(rule: &Rule, state: &RuleState, now: i64) -> Result<TriggeredEvent> {
    let severity = state.last_triggered_severity.unwrap_or(Severity::Crit);
    Ok(TriggeredEvent {
        id: next_id(),
        realm: rule.realm.clone(),
        rule_id: rule.id.clone(),
        resource: rule.resource.clone(),
        partition: rule.partition.clone(),
        metric_raw_name: rule.metric_raw_name.clone(),
        metric_display_name: rule.display_name().to_string(),
        category: rule.category.clone(),
        rule_snapshot: serde_json::to_value(rule)?,
        state_snapshot: serde_json::to_value(state)?,
        triggered_value: state.last_triggered_value.unwrap_or(state.last_check_value),
        threshold: rule.thresholds.get(severity),
        severity,
        triggered_at: now,
        first_triggered_at: state.first_triggered_at.unwrap_or(now),
        last_triggered_at: now,
        notify_state: NotifyState::Pending,
        resolved_at: None,
        resolved_value: None,
        resolved_notify_state: None,
    })
}
