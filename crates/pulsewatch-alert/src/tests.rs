use crate::cache::{ChangeOp, RuleCache};
use crate::engine::{AlertEngine, AlertEngineConfig};
use crate::events::{record_outcome, EventOutcome};
use crate::lock::RuleLocks;
use crate::matcher::{infer_intervals, normalize_keys, validate};
use crate::state_machine::{advance, is_check_value_only};
use crate::{evaluate, window, AlertError, Evaluation};
use pulsewatch_common::types::{
    AlertPayload, ChannelType, CompareOp, Condition, Contact, ContactState, DetectionType,
    MetricRuleDefinition, MetricSample, NotifyKind, NotifyState, PayloadMetadata, Rule, RuleState,
    RuleTemplate, Severity, Thresholds, TriggeredEvent,
};
use pulsewatch_storage::{MemoryStore, RuleCatalog, StateStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const T0: i64 = 1_700_000_000;

fn make_rule(id: &str) -> Rule {
    Rule {
        id: id.to_string(),
        realm: "acme".to_string(),
        name: "CPU 使用率过高".to_string(),
        target_id: "t-1".to_string(),
        resource: "web-01".to_string(),
        partition: String::new(),
        datasource: "node".to_string(),
        metric_rule_id: "mr-cpu".to_string(),
        metric_raw_name: "cpu_usage".to_string(),
        metric_display_name: "CPU usage".to_string(),
        category: "system".to_string(),
        unit: "%".to_string(),
        detection_type: DetectionType::Absolute,
        scale: 1.0,
        operator: CompareOp::Gt,
        duration: "5m".to_string(),
        times: 1,
        silence_period: "1h".to_string(),
        thresholds: Thresholds {
            info: None,
            warn: Some(70.0),
            crit: Some(90.0),
        },
        enabled: true,
        auto_apply: false,
        create_type: "user".to_string(),
        created_by: "tester".to_string(),
        created_at: T0,
    }
}

fn samples(points: &[(i64, f64)]) -> Vec<MetricSample> {
    points
        .iter()
        .map(|&(timestamp, value)| MetricSample { timestamp, value })
        .collect()
}

fn payload(key: &str, points: &[(i64, f64)]) -> AlertPayload {
    let mut data = BTreeMap::new();
    data.insert(key.to_string(), samples(points));
    AlertPayload {
        metadata: PayloadMetadata {
            realm: "acme".to_string(),
            resource: "web-01".to_string(),
            datasource: "node".to_string(),
            timestamp: points.last().map(|p| p.0).unwrap_or(T0),
        },
        data,
    }
}

/// Two samples a minute apart ending at `now`, both with `value`.
fn steady(now: i64, value: f64) -> AlertPayload {
    payload("cpu_usage", &[(now - 60, value), (now, value)])
}

fn make_definition() -> MetricRuleDefinition {
    MetricRuleDefinition {
        id: "mr-cpu".to_string(),
        name: "cpu usage".to_string(),
        category: "system".to_string(),
        detection_type: DetectionType::Absolute,
        metric_raw_name: "cpu_usage".to_string(),
        metric_display_name: "CPU usage".to_string(),
        unit: "%".to_string(),
        scale: 1.0,
        operator: CompareOp::Gt,
        duration: "10m".to_string(),
        thresholds: Thresholds {
            info: None,
            warn: Some(70.0),
            crit: Some(90.0),
        },
        match_datasource_names: vec![],
    }
}

fn make_contact(id: &str, auto_apply: bool) -> Contact {
    Contact {
        id: id.to_string(),
        realm: "acme".to_string(),
        name: format!("ops {id}"),
        channel_type: ChannelType::Webhook,
        config: serde_json::json!({"url": "http://127.0.0.1:9/hook"}),
        enabled: true,
        severities: vec![Severity::Crit],
        auto_apply,
        max_retry: None,
        retry_delay_secs: None,
    }
}

fn engine_with(store: &Arc<MemoryStore>, auto_apply_rule: bool) -> AlertEngine {
    AlertEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        AlertEngineConfig {
            auto_apply_rule,
            call_timeout: Duration::from_secs(5),
        },
    )
}

async fn engine_with_rule(rule: Rule) -> (Arc<MemoryStore>, AlertEngine) {
    pulsewatch_common::id::init(1, 1);
    let store = Arc::new(MemoryStore::new());
    store.insert_rule(rule);
    let engine = engine_with(&store, true);
    engine.rebuild_cache().await.unwrap();
    (store, engine)
}

// ---- detection ----

#[test]
fn amplitude_of_ten_twenty_fifteen_is_one_hundred_percent() {
    let mut rule = make_rule("r-amp");
    rule.detection_type = DetectionType::Amplitude;
    rule.thresholds = Thresholds {
        info: None,
        warn: None,
        crit: Some(50.0),
    };
    let eval = evaluate(&rule, &samples(&[(T0, 10.0), (T0 + 60, 20.0), (T0 + 120, 15.0)]));
    assert!(eval.exceeded);
    assert_eq!(eval.severity, Some(Severity::Crit));
    assert!((eval.value - 100.0).abs() < 1e-9);
}

#[test]
fn amplitude_needs_two_points() {
    let mut rule = make_rule("r-amp");
    rule.detection_type = DetectionType::Amplitude;
    let eval = evaluate(&rule, &samples(&[(T0, 10.0)]));
    assert_eq!(eval, Evaluation::normal(0.0));
}

#[test]
fn amplitude_floors_zero_minimum() {
    let mut rule = make_rule("r-amp");
    rule.detection_type = DetectionType::Amplitude;
    let eval = evaluate(&rule, &samples(&[(T0, 0.0), (T0 + 60, 1.0)]));
    assert!(eval.exceeded);
    assert!(eval.value.is_finite());
    assert!(eval.value > 1e6);
}

#[test]
fn amplitude_ignores_less_than_operator() {
    let mut rule = make_rule("r-amp");
    rule.detection_type = DetectionType::Amplitude;
    rule.operator = CompareOp::Lt;
    rule.thresholds = Thresholds {
        info: None,
        warn: None,
        crit: Some(50.0),
    };

    let flat = evaluate(&rule, &samples(&[(T0, 10.0), (T0 + 60, 10.0), (T0 + 120, 10.0)]));
    assert_eq!(flat, Evaluation::normal(0.0));

    let spread = evaluate(&rule, &samples(&[(T0, 10.0), (T0 + 60, 20.0)]));
    assert!(spread.exceeded);
    assert_eq!(spread.severity, Some(Severity::Crit));
}

#[test]
fn non_positive_thresholds_are_unset() {
    let mut rule = make_rule("r-abs");
    rule.operator = CompareOp::Lt;
    rule.thresholds = Thresholds {
        info: Some(-1.0),
        warn: Some(0.0),
        crit: Some(0.0),
    };
    // 任何读数都小于 0 阈值时也不应告警
    let eval = evaluate(&rule, &samples(&[(T0, -5.0), (T0 + 60, -6.0)]));
    assert!(!eval.exceeded);

    rule.detection_type = DetectionType::Amplitude;
    let eval = evaluate(&rule, &samples(&[(T0, 1.0), (T0 + 60, 50.0)]));
    assert!(!eval.exceeded);
    assert_eq!(eval.severity, None);

    rule.detection_type = DetectionType::Absolute;
    rule.operator = CompareOp::Gt;
    rule.thresholds.warn = Some(70.0);
    let eval = evaluate(&rule, &samples(&[(T0, 80.0), (T0 + 60, 95.0)]));
    assert!(eval.exceeded);
    assert_eq!(eval.severity, Some(Severity::Warn));
}

#[test]
fn absolute_requires_every_point_to_breach() {
    let mut rule = make_rule("r-abs");
    rule.thresholds = Thresholds {
        info: None,
        warn: None,
        crit: Some(10.0),
    };
    let eval = evaluate(&rule, &samples(&[(T0, 5.0), (T0 + 60, 15.0), (T0 + 120, 25.0)]));
    assert!(!eval.exceeded);
    assert_eq!(eval.value, 25.0);
    assert_eq!(eval.severity, None);
}

#[test]
fn absolute_reports_severity_of_last_point() {
    let rule = make_rule("r-abs");
    let eval = evaluate(&rule, &samples(&[(T0, 95.0), (T0 + 60, 75.0)]));
    assert!(eval.exceeded);
    assert_eq!(eval.severity, Some(Severity::Warn));
    assert_eq!(eval.value, 75.0);
}

#[test]
fn absolute_applies_scale_and_less_than() {
    let mut rule = make_rule("r-abs");
    rule.scale = 100.0;
    rule.operator = CompareOp::Lt;
    rule.thresholds = Thresholds {
        info: Some(50.0),
        warn: None,
        crit: Some(10.0),
    };
    let eval = evaluate(&rule, &samples(&[(T0, 0.3), (T0 + 60, 0.05)]));
    assert!(eval.exceeded);
    assert_eq!(eval.severity, Some(Severity::Crit));
    assert!((eval.value - 5.0).abs() < 1e-9);
}

#[test]
fn no_samples_is_not_exceeded() {
    let eval = evaluate(&make_rule("r-abs"), &[]);
    assert_eq!(eval, Evaluation::normal(0.0));
}

#[test]
fn window_drops_samples_older_than_duration() {
    let pts = samples(&[(T0 + 600, 99.0), (T0, 1.0), (T0 + 400, 98.0)]);
    let win = window::select(&pts, 300);
    assert_eq!(win.len(), 2);
    assert_eq!(win[0].timestamp, T0 + 400);
    assert_eq!(win[1].timestamp, T0 + 600);

    // 窗口内不足两个点时退回全部样本
    let win = window::select(&pts, 60);
    assert_eq!(win.len(), 3);
    assert_eq!(win[0].timestamp, T0);
}

#[test]
fn window_spike_outside_duration_is_ignored() {
    // The low sample is older than five minutes, so only breaching points remain.
    let rule = make_rule("r-abs");
    let eval = evaluate(
        &rule,
        &samples(&[(T0, 1.0), (T0 + 600, 95.0), (T0 + 660, 96.0)]),
    );
    assert!(eval.exceeded);
}

// ---- state machine ----

fn breach(value: f64) -> Evaluation {
    Evaluation {
        exceeded: true,
        value,
        severity: Some(Severity::Crit),
    }
}

#[test]
fn duration_gates_alerting() {
    let rule = make_rule("r-1");
    let s0 = RuleState::new("r-1");

    let s1 = advance(&s0, &rule, &breach(95.0), T0);
    assert_eq!(s1.condition, Condition::Normal);
    assert_eq!(s1.first_triggered_at, Some(T0));
    assert_eq!(s1.notify_counter, 0);

    let s2 = advance(&s1, &rule, &breach(95.0), T0 + 299);
    assert_eq!(s2.condition, Condition::Normal);
    assert_eq!(s2.first_triggered_at, Some(T0));

    let s3 = advance(&s2, &rule, &breach(96.0), T0 + 300);
    assert_eq!(s3.condition, Condition::Alerting);
    assert_eq!(s3.notify_counter, 1);
    assert_eq!(s3.last_triggered_value, Some(96.0));
    assert_eq!(s3.contact_state, ContactState::Silenced);
    assert_eq!(s3.silence_start, Some(T0 + 300));
    assert_eq!(s3.silence_end, Some(T0 + 300 + 3600));
}

#[test]
fn notify_counter_opens_silence_after_times() {
    let mut rule = make_rule("r-1");
    rule.duration = "0s".to_string();
    rule.times = 2;

    let s1 = advance(&RuleState::new("r-1"), &rule, &breach(95.0), T0);
    assert_eq!(s1.condition, Condition::Alerting);
    assert_eq!(s1.notify_counter, 1);
    assert_eq!(s1.contact_state, ContactState::Normal);

    let s2 = advance(&s1, &rule, &breach(95.0), T0 + 60);
    assert_eq!(s2.notify_counter, 2);
    assert_eq!(s2.contact_state, ContactState::Silenced);

    // 静默期内计数不再增长
    let s3 = advance(&s2, &rule, &breach(95.0), T0 + 120);
    assert_eq!(s3.notify_counter, 2);
    assert_eq!(s3.silence_start, Some(T0 + 60));
}

#[test]
fn silence_expiry_resets_window_and_counter() {
    let rule = make_rule("r-1");
    let mut state = RuleState::new("r-1");
    state.condition = Condition::Alerting;
    state.first_triggered_at = Some(T0);
    state.notify_counter = 1;
    state.silence_start = Some(T0);
    state.silence_end = Some(T0 + 3600);
    state.contact_state = ContactState::Silenced;

    // Recovering exactly at the end of the window still clears the silence.
    let next = advance(&state, &rule, &Evaluation::normal(10.0), T0 + 3600);
    assert_eq!(next.condition, Condition::Resolved);
    assert_eq!(next.silence_start, None);
    assert_eq!(next.silence_end, None);
    assert_eq!(next.notify_counter, 0);
    assert_eq!(next.contact_state, ContactState::Normal);
}

#[test]
fn recovery_inside_silence_keeps_counter() {
    let rule = make_rule("r-1");
    let mut state = RuleState::new("r-1");
    state.condition = Condition::Alerting;
    state.first_triggered_at = Some(T0);
    state.last_triggered_severity = Some(Severity::Crit);
    state.notify_counter = 1;
    state.silence_start = Some(T0);
    state.silence_end = Some(T0 + 3600);
    state.contact_state = ContactState::Silenced;

    let next = advance(&state, &rule, &Evaluation::normal(10.0), T0 + 60);
    assert_eq!(next.condition, Condition::Resolved);
    assert_eq!(next.first_triggered_at, None);
    assert_eq!(next.last_triggered_severity, None);
    assert_eq!(next.notify_counter, 1);
    assert_eq!(next.last_check_value, 10.0);

    let after = advance(&next, &rule, &Evaluation::normal(11.0), T0 + 120);
    assert_eq!(after.condition, Condition::Normal);
}

#[test]
fn resolved_relaxes_to_normal_while_breach_is_young() {
    let rule = make_rule("r-1");
    let mut state = RuleState::new("r-1");
    state.condition = Condition::Resolved;
    let next = advance(&state, &rule, &breach(95.0), T0);
    assert_eq!(next.condition, Condition::Normal);
}

#[test]
fn check_value_only_change_is_detected() {
    let rule = make_rule("r-1");
    let mut stored = RuleState::new("r-1");
    assert!(!is_check_value_only(
        &stored,
        &advance(&stored, &rule, &Evaluation::normal(3.0), T0)
    ));

    stored.version = 4;
    let next = advance(&stored, &rule, &Evaluation::normal(3.0), T0);
    assert!(is_check_value_only(&stored, &next));

    let next = advance(&stored, &rule, &breach(95.0), T0);
    assert!(!is_check_value_only(&stored, &next));
}

// ---- triggered events ----

#[tokio::test]
async fn record_outcome_skips_alerts_silenced_by_earlier_cycle() {
    let store = MemoryStore::new();
    let rule = make_rule("r-1");
    let mut state = RuleState::new("r-1");
    state.condition = Condition::Alerting;
    state.silence_start = Some(T0);
    state.silence_end = Some(T0 + 3600);
    state.contact_state = ContactState::Silenced;

    let outcome = record_outcome(&store, &rule, &mut state, T0 + 60).await.unwrap();
    assert_eq!(outcome, EventOutcome::Skipped);
    assert!(store.events().is_empty());

    // 同一周期打开静默时仍要创建事件
    let outcome = record_outcome(&store, &rule, &mut state, T0).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Created(_)));
    assert_eq!(store.events().len(), 1);
}

#[tokio::test]
async fn record_outcome_continues_open_event() {
    let store = MemoryStore::new();
    let rule = make_rule("r-1");
    let mut state = RuleState::new("r-1");
    state.condition = Condition::Alerting;
    state.last_triggered_value = Some(95.0);
    state.last_triggered_severity = Some(Severity::Crit);

    let EventOutcome::Created(id) = record_outcome(&store, &rule, &mut state, T0).await.unwrap()
    else {
        panic!("expected a new event");
    };
    assert_eq!(state.triggered_event_id.as_deref(), Some(id.as_str()));

    state.last_triggered_value = Some(75.0);
    state.last_triggered_severity = Some(Severity::Warn);
    let outcome = record_outcome(&store, &rule, &mut state, T0 + 60).await.unwrap();
    assert_eq!(outcome, EventOutcome::Updated(id.clone()));

    let event = store.get_triggered_event(&id).await.unwrap().unwrap();
    assert_eq!(event.severity, Severity::Warn);
    assert_eq!(event.threshold, Some(70.0));
    assert_eq!(event.triggered_value, 75.0);
    assert_eq!(event.triggered_at, T0);
    assert_eq!(event.last_triggered_at, T0 + 60);
    assert_eq!(event.rule_snapshot["id"], "r-1");
}

/// Marks every event the engine reads as sent, the way a dispatcher flush
/// landing between the engine's read and write would.
struct FlushBetweenReads {
    inner: MemoryStore,
}

#[async_trait::async_trait]
impl StateStore for FlushBetweenReads {
    async fn state_for_update(&self, rule_id: &str) -> pulsewatch_storage::Result<RuleState> {
        self.inner.state_for_update(rule_id).await
    }

    async fn get_state(&self, rule_id: &str) -> pulsewatch_storage::Result<Option<RuleState>> {
        self.inner.get_state(rule_id).await
    }

    async fn save_state(
        &self,
        old: &RuleState,
        new: &RuleState,
    ) -> pulsewatch_storage::Result<RuleState> {
        self.inner.save_state(old, new).await
    }

    async fn update_last_check_value(
        &self,
        rule_id: &str,
        value: f64,
        now: i64,
    ) -> pulsewatch_storage::Result<()> {
        self.inner.update_last_check_value(rule_id, value, now).await
    }

    async fn create_triggered_event(&self, event: &TriggeredEvent) -> pulsewatch_storage::Result<()> {
        self.inner.create_triggered_event(event).await
    }

    async fn update_triggered_event(&self, event: &TriggeredEvent) -> pulsewatch_storage::Result<()> {
        self.inner.update_triggered_event(event).await
    }

    async fn resolve_triggered_event(
        &self,
        id: &str,
        resolved_at: i64,
        resolved_value: f64,
    ) -> pulsewatch_storage::Result<bool> {
        self.inner
            .resolve_triggered_event(id, resolved_at, resolved_value)
            .await
    }

    async fn get_triggered_event(
        &self,
        id: &str,
    ) -> pulsewatch_storage::Result<Option<TriggeredEvent>> {
        let event = self.inner.get_triggered_event(id).await?;
        self.inner
            .set_notify_state(&[id.to_string()], NotifyKind::Alerting, NotifyState::Sent)
            .await?;
        Ok(event)
    }

    async fn open_triggered_event(
        &self,
        rule_id: &str,
    ) -> pulsewatch_storage::Result<Option<TriggeredEvent>> {
        self.inner.open_triggered_event(rule_id).await
    }

    async fn triggered_events_by_ids(
        &self,
        ids: &[String],
    ) -> pulsewatch_storage::Result<Vec<TriggeredEvent>> {
        self.inner.triggered_events_by_ids(ids).await
    }

    async fn pending_events(
        &self,
        triggered_before: i64,
    ) -> pulsewatch_storage::Result<Vec<TriggeredEvent>> {
        self.inner.pending_events(triggered_before).await
    }

    async fn resolved_unnotified(&self, now: i64) -> pulsewatch_storage::Result<Vec<TriggeredEvent>> {
        self.inner.resolved_unnotified(now).await
    }

    async fn set_notify_state(
        &self,
        ids: &[String],
        kind: NotifyKind,
        state: NotifyState,
    ) -> pulsewatch_storage::Result<()> {
        self.inner.set_notify_state(ids, kind, state).await
    }
}

#[tokio::test]
async fn record_outcome_keeps_notify_state_written_by_flush() {
    let store = FlushBetweenReads {
        inner: MemoryStore::new(),
    };
    let rule = make_rule("r-1");
    let mut state = RuleState::new("r-1");
    state.condition = Condition::Alerting;
    state.last_triggered_value = Some(95.0);
    state.last_triggered_severity = Some(Severity::Crit);

    let EventOutcome::Created(id) = record_outcome(&store, &rule, &mut state, T0).await.unwrap()
    else {
        panic!("expected a new event");
    };

    // 持续告警：引擎读到 pending，写回前 flush 已置为 sent
    state.last_triggered_value = Some(96.0);
    let outcome = record_outcome(&store, &rule, &mut state, T0 + 60).await.unwrap();
    assert_eq!(outcome, EventOutcome::Updated(id.clone()));
    let event = store.inner.get_triggered_event(&id).await.unwrap().unwrap();
    assert_eq!(event.notify_state, NotifyState::Sent);
    assert_eq!(event.triggered_value, 96.0);

    store
        .inner
        .set_notify_state(&[id.clone()], NotifyKind::Alerting, NotifyState::Pending)
        .await
        .unwrap();
    state.condition = Condition::Resolved;
    state.last_check_value = 40.0;
    let outcome = record_outcome(&store, &rule, &mut state, T0 + 120).await.unwrap();
    assert_eq!(outcome, EventOutcome::Resolved(id.clone()));

    let event = store.inner.get_triggered_event(&id).await.unwrap().unwrap();
    assert_eq!(event.notify_state, NotifyState::Sent);
    assert_eq!(event.resolved_at, Some(T0 + 120));
    assert_eq!(event.resolved_value, Some(40.0));
    assert_eq!(event.resolved_notify_state, Some(NotifyState::Pending));
    assert!(state.triggered_event_id.is_none());
}

// ---- cache ----

#[tokio::test]
async fn cache_indexes_by_resource_and_metric_key() {
    let store = MemoryStore::new();
    let mut disk = make_rule("r-disk");
    disk.metric_rule_id = "mr-disk".to_string();
    disk.metric_raw_name = "disk_used".to_string();
    disk.partition = "/var".to_string();
    store.insert_rule(make_rule("r-cpu"));
    store.insert_rule(disk);
    let mut disabled = make_rule("r-off");
    disabled.enabled = false;
    store.insert_rule(disabled);

    let cache = RuleCache::new();
    assert_eq!(cache.rebuild(&store).await.unwrap(), 2);
    assert_eq!(cache.len(), 2);

    let hit = cache.lookup("acme", "web-01", ["disk_used:/var"]);
    assert_eq!(hit.len(), 1);
    assert_eq!(hit[0].id, "r-disk");
    assert!(cache.lookup("acme", "web-01", ["disk_used"]).is_empty());
    assert!(cache.lookup("acme", "db-01", ["cpu_usage"]).is_empty());
    assert_eq!(
        cache
            .lookup("acme", "web-01", ["cpu_usage", "disk_used:/var"])
            .len(),
        2
    );
}

#[test]
fn cache_apply_patches_single_rules() {
    let cache = RuleCache::new();
    let mut rule = make_rule("r-1");
    cache.apply(&rule, ChangeOp::Create);
    assert_eq!(cache.len(), 1);

    rule.resource = "web-02".to_string();
    cache.apply(&rule, ChangeOp::Update);
    assert_eq!(cache.len(), 1);
    assert!(cache.lookup("acme", "web-01", ["cpu_usage"]).is_empty());
    assert_eq!(cache.lookup("acme", "web-02", ["cpu_usage"]).len(), 1);

    rule.enabled = false;
    cache.apply(&rule, ChangeOp::Update);
    assert!(cache.is_empty());

    rule.enabled = true;
    cache.apply(&rule, ChangeOp::Create);
    cache.apply(&rule, ChangeOp::Delete);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn rule_locks_are_pruned_once_released() {
    let locks = RuleLocks::new();
    {
        let _a = locks.lock("r-1").await;
        let _b = locks.lock("r-2").await;
        assert_eq!(locks.len(), 2);
    }
    let _c = locks.lock("r-3").await;
    assert_eq!(locks.len(), 1);
}

// ---- validation & matching ----

#[test]
fn validation_rejects_malformed_payloads() {
    let good = steady(T0, 1.0);
    assert!(validate(&good).is_ok());

    let mut p = good.clone();
    p.metadata.realm.clear();
    assert!(validate(&p).unwrap_err().is_validation());

    let mut p = good.clone();
    p.metadata.timestamp = 0;
    assert!(validate(&p).is_err());

    let mut p = good.clone();
    p.data.clear();
    assert!(validate(&p).is_err());

    let mut p = good.clone();
    p.data.insert("mem".to_string(), vec![]);
    assert!(validate(&p).is_err());

    let p = payload("cpu_usage", &[(T0, f64::NAN)]);
    assert!(validate(&p).is_err());

    let p = payload("cpu_usage", &[(T0, f64::INFINITY)]);
    assert!(validate(&p).is_err());
}

#[test]
fn empty_partition_keys_are_normalized() {
    let p = payload(":rack-1", &[(T0, 1.0)]);
    assert!(validate(&p).unwrap_err().is_validation());

    let plain = steady(T0, 1.0);
    assert!(matches!(normalize_keys(&plain), std::borrow::Cow::Borrowed(_)));

    let mut p = payload("cpu_usage:", &[(T0, 2.0)]);
    p.data.insert("cpu_usage".to_string(), samples(&[(T0 - 60, 1.0)]));
    p.data.insert("temp:rack-1".to_string(), samples(&[(T0, 30.0)]));
    let normalized = normalize_keys(&p);
    let keys: Vec<&str> = normalized.data.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["cpu_usage", "temp:rack-1"]);
    assert_eq!(normalized.data["cpu_usage"], samples(&[(T0 - 60, 1.0), (T0, 2.0)]));
}

#[test]
fn intervals_need_three_samples() {
    assert_eq!(infer_intervals(&samples(&[(T0, 1.0), (T0 + 60, 1.0)])), (0, 0));
    assert_eq!(
        infer_intervals(&samples(&[(T0 + 60, 1.0), (T0, 1.0), (T0 + 120, 1.0)])),
        (60, 120)
    );
}

#[tokio::test]
async fn new_target_is_provisioned_from_template() {
    pulsewatch_common::id::init(1, 1);
    let store = Arc::new(MemoryStore::new());
    store.insert_metric_rule(make_definition());
    store.insert_rule_template(RuleTemplate {
        id: "tpl-1".to_string(),
        realm: "acme".to_string(),
        name: "cpu template".to_string(),
        datasource: String::new(),
        metric_rule_id: "mr-cpu".to_string(),
        thresholds: Thresholds {
            info: None,
            warn: None,
            crit: Some(80.0),
        },
        duration: String::new(),
        times: 0,
        silence_period: String::new(),
        auto_apply: true,
        enabled: true,
    });
    store.insert_contact(make_contact("c-auto", true));
    store.insert_contact(make_contact("c-manual", false));
    let engine = engine_with(&store, true);

    let p = payload(
        "cpu_usage:core0",
        &[(T0, 10.0), (T0 + 60, 12.0), (T0 + 120, 11.0)],
    );
    let summary = engine.process_alert_at(&p, T0 + 120).await.unwrap();
    assert_eq!(summary.evaluated, 1);

    let targets = store.targets();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].partition, "core0");
    assert_eq!(targets[0].category, "system");
    assert_eq!(targets[0].collection_interval, 60);
    assert_eq!(targets[0].reporting_interval, 120);
    assert_eq!(targets[0].created_by, "system");

    let rules = store.rules();
    assert_eq!(rules.len(), 1);
    let rule = &rules[0];
    assert_eq!(rule.name, "cpu template");
    assert_eq!(rule.target_id, targets[0].id);
    assert_eq!(rule.thresholds.crit, Some(80.0));
    assert_eq!(rule.thresholds.warn, None);
    assert_eq!(rule.duration, "10m");
    assert_eq!(rule.times, 1);
    assert_eq!(rule.silence_period, "1h");
    assert_eq!(rule.create_type, "system");
    assert!(rule.enabled);
    assert!(!rule.auto_apply);

    assert_eq!(store.bound_contacts(&rule.id), vec!["c-auto".to_string()]);
    assert_eq!(engine.cache().len(), 1);
    assert!(store.get_state(&rule.id).await.unwrap().is_some());

    // Second payload hits the cache and provisions nothing new.
    engine.process_alert_at(&p, T0 + 180).await.unwrap();
    assert_eq!(store.targets().len(), 1);
    assert_eq!(store.rules().len(), 1);
}

#[tokio::test]
async fn definition_fallback_respects_datasource_filter() {
    pulsewatch_common::id::init(1, 1);
    let store = Arc::new(MemoryStore::new());
    let mut def = make_definition();
    def.match_datasource_names = vec!["node".to_string()];
    store.insert_metric_rule(def.clone());
    def.id = "mr-cpu-snmp".to_string();
    def.match_datasource_names = vec!["snmp".to_string()];
    store.insert_metric_rule(def);
    let engine = engine_with(&store, true);

    engine
        .process_alert_at(&steady(T0, 5.0), T0)
        .await
        .unwrap();
    let rules = store.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].metric_rule_id, "mr-cpu");
    assert_eq!(rules[0].times, 1);
    assert_eq!(rules[0].duration, "10m");
    assert_eq!(rules[0].silence_period, "1h");
}

#[tokio::test]
async fn unknown_metric_creates_target_without_rules() {
    pulsewatch_common::id::init(1, 1);
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(&store, true);

    let summary = engine
        .process_alert_at(&payload("humidity:rack-1", &[(T0, 40.0)]), T0)
        .await
        .unwrap();
    assert_eq!(summary.evaluated, 0);
    let targets = store.targets();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].category, "node");
    assert!(store.rules().is_empty());
}

#[tokio::test]
async fn disabled_auto_apply_falls_back_to_resource_rules() {
    pulsewatch_common::id::init(1, 1);
    let store = Arc::new(MemoryStore::new());
    store.insert_metric_rule(make_definition());
    store.insert_rule(make_rule("r-1"));
    let engine = engine_with(&store, false);

    let summary = engine
        .process_alert_at(&steady(T0, 5.0), T0)
        .await
        .unwrap();
    assert_eq!(summary.evaluated, 1);
    assert!(store.targets().is_empty());
    assert_eq!(store.rules().len(), 1);
}

// ---- pipeline ----

#[tokio::test]
async fn re_evaluating_a_quiet_payload_is_idempotent() {
    let (store, engine) = engine_with_rule(make_rule("r-1")).await;
    let p = steady(T0, 20.0);

    engine.process_alert_at(&p, T0).await.unwrap();
    engine.process_alert_at(&p, T0 + 10).await.unwrap();

    assert!(store.events().is_empty());
    let state = store.get_state("r-1").await.unwrap().unwrap();
    assert_eq!(state.condition, Condition::Normal);
    assert_eq!(state.last_check_value, 20.0);
    // 第二次只走轻量更新，版本号不变
    assert_eq!(state.version, 1);
    assert_eq!(state.updated_at, T0 + 10);
}

#[tokio::test]
async fn trailing_colon_key_reaches_whole_metric_rule() {
    let (store, engine) = engine_with_rule(make_rule("r-1")).await;
    let at = |now: i64, value: f64| payload("cpu_usage:", &[(now - 60, value), (now, value)]);

    let s = engine.process_alert_at(&at(T0, 95.0), T0).await.unwrap();
    assert_eq!(s.evaluated, 1);
    let s = engine.process_alert_at(&at(T0 + 300, 95.0), T0 + 300).await.unwrap();
    assert_eq!(s.alerting, 1);
    assert_eq!(store.events().len(), 1);
    assert_eq!(store.events()[0].rule_id, "r-1");
}

#[tokio::test]
async fn breach_lifecycle_opens_silences_and_resolves_one_event() {
    let (store, engine) = engine_with_rule(make_rule("r-1")).await;

    let s = engine.process_alert_at(&steady(T0, 95.0), T0).await.unwrap();
    assert_eq!(s.alerting, 0);
    assert!(store.events().is_empty());

    let s = engine
        .process_alert_at(&steady(T0 + 300, 95.0), T0 + 300)
        .await
        .unwrap();
    assert_eq!(s.alerting, 1);
    let events = store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Crit);
    assert_eq!(events[0].threshold, Some(90.0));
    assert_eq!(events[0].first_triggered_at, T0);
    let state = store.get_state("r-1").await.unwrap().unwrap();
    assert_eq!(state.notify_counter, 1);
    assert_eq!(state.contact_state, ContactState::Silenced);
    assert_eq!(state.triggered_event_id.as_deref(), Some(events[0].id.as_str()));

    // Breaches inside the silence window neither count nor open events.
    for now in [T0 + 360, T0 + 420] {
        engine
            .process_alert_at(&steady(now, 97.0), now)
            .await
            .unwrap();
    }
    assert_eq!(store.events().len(), 1);
    let state = store.get_state("r-1").await.unwrap().unwrap();
    assert_eq!(state.notify_counter, 1);

    let s = engine
        .process_alert_at(&steady(T0 + 480, 12.0), T0 + 480)
        .await
        .unwrap();
    assert_eq!(s.resolved, 1);
    let events = store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].resolved_at, Some(T0 + 480));
    assert_eq!(events[0].resolved_value, Some(12.0));
    let state = store.get_state("r-1").await.unwrap().unwrap();
    assert_eq!(state.condition, Condition::Resolved);
    assert_eq!(state.triggered_event_id, None);

    engine
        .process_alert_at(&steady(T0 + 540, 12.0), T0 + 540)
        .await
        .unwrap();
    let state = store.get_state("r-1").await.unwrap().unwrap();
    assert_eq!(state.condition, Condition::Normal);
    assert_eq!(store.events().len(), 1);
}

#[tokio::test]
async fn persistence_failure_is_absorbed_per_rule() {
    let (store, engine) = engine_with_rule(make_rule("r-1")).await;
    store.fail_state_writes(true);

    let summary = engine
        .process_alert_at(&steady(T0, 95.0), T0)
        .await
        .unwrap();
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.failed, 1);
    assert!(store.get_state("r-1").await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_payload_touches_nothing() {
    let (store, engine) = engine_with_rule(make_rule("r-1")).await;
    let mut p = steady(T0, 95.0);
    p.metadata.datasource.clear();

    let err = engine.process_alert_at(&p, T0).await.unwrap_err();
    assert!(matches!(err, AlertError::Validation(_)));
    assert!(store.get_state("r-1").await.unwrap().is_none());
    assert!(store.targets().is_empty());
}

#[tokio::test]
async fn concurrent_evaluations_of_one_rule_serialize() {
    let (store, engine) = engine_with_rule(make_rule("r-1")).await;
    let engine = Arc::new(engine);

    let a = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.process_alert_at(&steady(T0, 95.0), T0).await })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.process_alert_at(&steady(T0, 96.0), T0).await })
    };
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a.failed + b.failed, 0);

    let state = store.get_state("r-1").await.unwrap().unwrap();
    assert_eq!(state.first_triggered_at, Some(T0));
    assert_eq!(state.version, 2);
}

#[tokio::test]
async fn rule_change_hooks_update_cache() {
    let (store, engine) = engine_with_rule(make_rule("r-1")).await;
    assert_eq!(engine.cache().len(), 1);

    let mut extra = make_rule("r-2");
    extra.metric_raw_name = "mem_usage".to_string();
    extra.metric_rule_id = "mr-mem".to_string();
    engine.on_rule_changed(&extra, ChangeOp::Create);
    assert_eq!(engine.cache().len(), 2);

    engine.on_rule_changed(&extra, ChangeOp::Delete);
    assert_eq!(engine.cache().len(), 1);

    store.insert_rule(extra);
    engine
        .on_contact_changed("c-1", ChangeOp::Update)
        .await
        .unwrap();
    assert_eq!(engine.cache().len(), 2);
    assert_eq!(store.all_enabled_rules().await.unwrap().len(), 2);
}
