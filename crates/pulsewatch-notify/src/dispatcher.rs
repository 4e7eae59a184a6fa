use crate::data::build_template_data;
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelRegistry;
use crate::template::{PlaceholderRenderer, TemplateRenderer, TemplateSet};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::{Message, Notifier};
use pulsewatch_common::id::next_id;
use pulsewatch_common::types::{
    Contact, NotifyErrorDetail, NotifyKind, NotifyLog, NotifyState, TriggeredEvent,
};
use pulsewatch_storage::{ContactRegistry, NotifyLogStore, StateStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Error detail types recorded on notify logs.
pub const ERROR_RENDER: &str = "render";
pub const ERROR_SEND: &str = "send";
pub const ERROR_RETRY: &str = "retry";
pub const ERROR_RETRY_EXHAUSTED: &str = "retry_exhausted";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Retries allowed after the first failed send of a notify log.
    pub max_retry: u32,
    pub retry_delay_secs: i64,
    /// Minimum age of a triggered event before it is notified.
    pub pending_time_secs: i64,
    /// Bound on every storage and notifier call.
    pub call_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            retry_delay_secs: 300,
            pending_time_secs: 600,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Counters of one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushSummary {
    /// Another flush was still running; nothing was done.
    pub skipped: bool,
    pub alerting_events: usize,
    pub resolved_events: usize,
    /// Events closed without a notification.
    pub processed_events: usize,
    pub sent_logs: usize,
    pub failed_logs: usize,
    pub retried_logs: usize,
    pub exhausted_logs: usize,
}

pub type ContactBuckets = BTreeMap<String, (Contact, Vec<TriggeredEvent>)>;

/// Delivers triggered events to their contacts in per-contact batches and
/// retries failed deliveries.
pub struct NotificationDispatcher {
    states: Arc<dyn StateStore>,
    logs: Arc<dyn NotifyLogStore>,
    contacts: Arc<dyn ContactRegistry>,
    notifier: Arc<dyn Notifier>,
    renderer: Arc<dyn TemplateRenderer>,
    templates: TemplateSet,
    registry: Arc<ChannelRegistry>,
    config: DispatcherConfig,
    running: Mutex<()>,
}

impl NotificationDispatcher {
    pub fn new(
        states: Arc<dyn StateStore>,
        logs: Arc<dyn NotifyLogStore>,
        contacts: Arc<dyn ContactRegistry>,
        notifier: Arc<dyn Notifier>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            states,
            logs,
            contacts,
            notifier,
            renderer: Arc::new(PlaceholderRenderer),
            templates: TemplateSet::builtin(),
            registry: Arc::new(ChannelRegistry::default()),
            config,
            running: Mutex::new(()),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_templates(mut self, templates: TemplateSet) -> Self {
        self.templates = templates;
        self
    }

    /// Registry used to redact secrets from stored contact snapshots.
    pub fn with_registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = pulsewatch_storage::Result<T>>,
    {
        let after = self.config.call_timeout;
        Ok(tokio::time::timeout(after, fut)
            .await
            .map_err(|_| NotifyError::Timeout { operation, after })??)
    }

    /// Runs one notification cycle: retries due failed logs, then notifies
    /// pending alerting events and resolved events.
    ///
    /// Returns immediately with `skipped = true` when a previous cycle is
    /// still running.
    pub async fn flush(&self, now: i64) -> Result<FlushSummary> {
        let Ok(_running) = self.running.try_lock() else {
            tracing::debug!("Notification flush still running, skipping");
            return Ok(FlushSummary {
                skipped: true,
                ..FlushSummary::default()
            });
        };

        let mut summary = FlushSummary::default();
        self.retry(now, &mut summary).await?;

        let owned = self
            .call(
                "failed_log_event_ids",
                self.logs.failed_log_event_ids(NotifyKind::Alerting),
            )
            .await?;
        self.flush_alerting(now, &owned, &mut summary).await?;

        let owned = self
            .call(
                "failed_log_event_ids",
                self.logs.failed_log_event_ids(NotifyKind::Resolved),
            )
            .await?;
        self.flush_resolved(now, &owned, &mut summary).await?;

        if summary.sent_logs + summary.failed_logs + summary.retried_logs > 0 {
            tracing::info!(
                sent = summary.sent_logs,
                failed = summary.failed_logs,
                retried = summary.retried_logs,
                exhausted = summary.exhausted_logs,
                "Notification flush finished"
            );
        }
        Ok(summary)
    }

    async fn flush_alerting(
        &self,
        now: i64,
        owned: &HashSet<String>,
        summary: &mut FlushSummary,
    ) -> Result<()> {
        let pending = self
            .call(
                "pending_events",
                self.states
                    .pending_events(now - self.config.pending_time_secs),
            )
            .await?;

        let mut events = Vec::with_capacity(pending.len());
        for event in pending {
            if owned.contains(&event.id) || self.silenced(&event, now).await? {
                continue;
            }
            events.push(event);
        }
        summary.alerting_events += events.len();
        self.dispatch(NotifyKind::Alerting, events, now, summary)
            .await
    }

    async fn flush_resolved(
        &self,
        now: i64,
        owned: &HashSet<String>,
        summary: &mut FlushSummary,
    ) -> Result<()> {
        let resolved = self
            .call("resolved_unnotified", self.states.resolved_unnotified(now))
            .await?;

        // 告警从未送达的事件，恢复时不再通知
        let (events, never_sent): (Vec<_>, Vec<_>) = resolved
            .into_iter()
            .filter(|e| !owned.contains(&e.id))
            .partition(|e| e.notify_state == NotifyState::Sent);

        if !never_sent.is_empty() {
            let ids: Vec<String> = never_sent.iter().map(|e| e.id.clone()).collect();
            self.mark(&ids, NotifyKind::Resolved, NotifyState::Processed)
                .await;
            summary.processed_events += ids.len();
        }

        summary.resolved_events += events.len();
        self.dispatch(NotifyKind::Resolved, events, now, summary)
            .await
    }

    /// An event triggered inside a silence window that was already open is
    /// not notified until the window ends.
    async fn silenced(&self, event: &TriggeredEvent, now: i64) -> Result<bool> {
        let state = self
            .call("get_state", self.states.get_state(&event.rule_id))
            .await?;
        Ok(match state {
            Some(s) => match (s.silence_start, s.silence_end) {
                (Some(start), Some(end)) => {
                    start < event.triggered_at && event.triggered_at <= now && now < end
                }
                _ => false,
            },
            None => false,
        })
    }

    /// Buckets events by the enabled contacts of their rule that subscribe to
    /// the event's severity.
    pub async fn group_by_contact(&self, events: Vec<TriggeredEvent>) -> Result<ContactBuckets> {
        let mut by_rule: HashMap<String, Vec<Contact>> = HashMap::new();
        let mut buckets = ContactBuckets::new();

        for event in events {
            if !by_rule.contains_key(&event.rule_id) {
                let contacts = self
                    .call(
                        "contacts_for_rule",
                        self.contacts.contacts_for_rule(&event.rule_id),
                    )
                    .await?;
                by_rule.insert(event.rule_id.clone(), contacts);
            }
            let Some(contacts) = by_rule.get(&event.rule_id) else {
                continue;
            };
            for contact in contacts
                .iter()
                .filter(|c| c.enabled && c.subscribes(event.severity))
            {
                buckets
                    .entry(contact.id.clone())
                    .or_insert_with(|| (contact.clone(), Vec::new()))
                    .1
                    .push(event.clone());
            }
        }
        Ok(buckets)
    }

    async fn dispatch(
        &self,
        kind: NotifyKind,
        events: Vec<TriggeredEvent>,
        now: i64,
        summary: &mut FlushSummary,
    ) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let all_ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        let buckets = self.group_by_contact(events).await?;

        let mut delivered: HashSet<String> = HashSet::new();
        let mut attempted: HashSet<String> = HashSet::new();
        for (contact, bucket) in buckets.into_values() {
            let ids: Vec<String> = bucket.iter().map(|e| e.id.clone()).collect();
            let ok = self.send_bucket(kind, &contact, &bucket, ids.clone(), now).await;
            if ok {
                summary.sent_logs += 1;
                delivered.extend(ids.iter().cloned());
            } else {
                summary.failed_logs += 1;
            }
            attempted.extend(ids);
        }

        let (sent, failed): (Vec<String>, Vec<String>) = attempted
            .into_iter()
            .partition(|id| delivered.contains(id));
        // 没有任何联系人订阅的事件直接结束
        let orphaned: Vec<String> = all_ids
            .into_iter()
            .filter(|id| !sent.contains(id) && !failed.contains(id))
            .collect();

        self.mark(&sent, kind, kind.success_state()).await;
        self.mark(&failed, kind, NotifyState::Failed).await;
        if !orphaned.is_empty() {
            tracing::debug!(
                count = orphaned.len(),
                kind = %kind,
                "No subscribed contact, closing events without notification"
            );
            self.mark(&orphaned, kind, NotifyState::Processed).await;
            summary.processed_events += orphaned.len();
        }
        Ok(())
    }

    /// Sends one batch to one contact and records the attempt.
    async fn send_bucket(
        &self,
        kind: NotifyKind,
        contact: &Contact,
        events: &[TriggeredEvent],
        ids: Vec<String>,
        now: i64,
    ) -> bool {
        let outcome = self.deliver(kind, contact, events).await;
        let mut log = NotifyLog {
            id: next_id(),
            realm: contact.realm.clone(),
            kind,
            state: kind.success_state(),
            contact_id: contact.id.clone(),
            channel_type: contact.channel_type,
            contact_snapshot: self.snapshot(contact),
            triggered_event_ids: ids,
            retry_counter: 0,
            last_retry_at: None,
            sent_at: None,
            error: None,
            exhausted: false,
            created_at: now,
        };

        let ok = match outcome {
            Ok(()) => {
                log.sent_at = Some(now);
                tracing::info!(
                    contact_id = %contact.id,
                    notify_log_id = %log.id,
                    kind = %kind,
                    events = events.len(),
                    "Notification sent"
                );
                true
            }
            Err(e) => {
                log.state = NotifyState::Failed;
                log.error = Some(error_detail(now, e.detail_kind(), &e, 0));
                tracing::warn!(
                    contact_id = %contact.id,
                    notify_log_id = %log.id,
                    kind = %kind,
                    error = %e,
                    "Notification failed"
                );
                false
            }
        };

        if let Err(e) = self
            .call("create_notify_log", self.logs.create_notify_log(&log))
            .await
        {
            tracing::error!(notify_log_id = %log.id, error = %e, "Failed to record notify log");
        }
        ok
    }

    /// Renders the batch for the contact's channel format and sends it.
    async fn deliver(
        &self,
        kind: NotifyKind,
        contact: &Contact,
        events: &[TriggeredEvent],
    ) -> Result<()> {
        let format = contact.channel_type.format();
        let template = self.templates.find(kind, format).ok_or_else(|| {
            NotifyError::TemplateError(format!("no {kind} template for format {format}"))
        })?;
        let data = build_template_data(contact, events, kind);
        let (title, body) = self.renderer.render(template, &data)?;
        let message = Message {
            title,
            body,
            format,
        };

        let after = self.config.call_timeout;
        tokio::time::timeout(
            after,
            self.notifier
                .send(contact.channel_type, &contact.config, &message),
        )
        .await
        .map_err(|_| NotifyError::Timeout {
            operation: "notifier.send",
            after,
        })?
    }

    fn snapshot(&self, contact: &Contact) -> Value {
        let mut snapshot = serde_json::to_value(contact).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut snapshot {
            map.insert(
                "config".to_string(),
                self.registry.redact(contact.channel_type, &contact.config),
            );
        }
        snapshot
    }

    async fn mark(&self, ids: &[String], kind: NotifyKind, state: NotifyState) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self
            .call(
                "set_notify_state",
                self.states.set_notify_state(ids, kind, state),
            )
            .await
        {
            tracing::error!(
                kind = %kind,
                state = %state,
                count = ids.len(),
                error = %e,
                "Failed to update event notify state"
            );
        }
    }

    /// Re-sends failed notify logs whose retry delay has elapsed. A log whose
    /// retry budget is spent is marked exhausted and never attempted again.
    pub async fn retry(&self, now: i64, summary: &mut FlushSummary) -> Result<()> {
        let failed = self
            .call("failed_notify_logs", self.logs.failed_notify_logs())
            .await?;

        for mut log in failed {
            let contact = self
                .call("get_contact", self.contacts.get_contact(&log.contact_id))
                .await?;
            let Some(contact) = contact.filter(|c| c.enabled) else {
                self.exhaust(&mut log, now, "contact removed or disabled")
                    .await;
                summary.exhausted_logs += 1;
                continue;
            };

            let max_retry = contact.max_retry.unwrap_or(self.config.max_retry);
            let delay = contact
                .retry_delay_secs
                .unwrap_or(self.config.retry_delay_secs);

            if log.retry_counter >= max_retry {
                let reason = format!("gave up after {} retries", log.retry_counter);
                self.exhaust(&mut log, now, &reason).await;
                summary.exhausted_logs += 1;
                continue;
            }
            // 首次重试不等待，之后按 retry_delay 间隔
            if log.last_retry_at.is_some_and(|last| now - last < delay) {
                continue;
            }

            let events = self
                .call(
                    "triggered_events_by_ids",
                    self.states.triggered_events_by_ids(&log.triggered_event_ids),
                )
                .await?;
            if events.is_empty() {
                self.exhaust(&mut log, now, "triggered events no longer exist")
                    .await;
                summary.exhausted_logs += 1;
                continue;
            }

            log.retry_counter += 1;
            log.last_retry_at = Some(now);
            summary.retried_logs += 1;

            match self.deliver(log.kind, &contact, &events).await {
                Ok(()) => {
                    log.state = log.kind.success_state();
                    log.sent_at = Some(now);
                    log.error = None;
                    tracing::info!(
                        contact_id = %contact.id,
                        notify_log_id = %log.id,
                        retry = log.retry_counter,
                        "Notification retry succeeded"
                    );
                    self.mark(&log.triggered_event_ids, log.kind, log.kind.success_state())
                        .await;
                }
                Err(e) => {
                    log.error = Some(error_detail(now, ERROR_RETRY, &e, log.retry_counter));
                    if log.retry_counter >= max_retry {
                        log.exhausted = true;
                        log.error = Some(error_detail(
                            now,
                            ERROR_RETRY_EXHAUSTED,
                            &e,
                            log.retry_counter,
                        ));
                        summary.exhausted_logs += 1;
                    }
                    tracing::warn!(
                        contact_id = %contact.id,
                        notify_log_id = %log.id,
                        retry = log.retry_counter,
                        exhausted = log.exhausted,
                        error = %e,
                        "Notification retry failed"
                    );
                }
            }

            if let Err(e) = self
                .call("update_notify_log", self.logs.update_notify_log(&log))
                .await
            {
                tracing::error!(notify_log_id = %log.id, error = %e, "Failed to update notify log");
            }
        }
        Ok(())
    }

    async fn exhaust(&self, log: &mut NotifyLog, now: i64, reason: &str) {
        log.exhausted = true;
        log.error = Some(NotifyErrorDetail {
            time: now,
            kind: ERROR_RETRY_EXHAUSTED.to_string(),
            message: reason.to_string(),
            retry: log.retry_counter,
        });
        tracing::warn!(notify_log_id = %log.id, reason, "Notify log retries exhausted");
        if let Err(e) = self
            .call("update_notify_log", self.logs.update_notify_log(log))
            .await
        {
            tracing::error!(notify_log_id = %log.id, error = %e, "Failed to update notify log");
        }
    }
}

fn error_detail(now: i64, kind: &str, err: &NotifyError, retry: u32) -> NotifyErrorDetail {
    NotifyErrorDetail {
        time: now,
        kind: kind.to_string(),
        message: truncate_string(&err.to_string(), MAX_BODY_LENGTH),
        retry,
    }
}
