use crate::store::AlertStore;
use crate::{ContactRegistry, NotifyLogStore, RuleCatalog, StateStore, StorageError};
use pulsewatch_common::types::{
    ChannelType, CompareOp, Condition, Contact, DetectionType, MetricRuleDefinition, NotifyKind,
    NotifyLog, NotifyState, Rule, RuleState, RuleTemplate, Severity, Target, Thresholds,
    TriggeredEvent,
};
use tempfile::TempDir;

async fn setup() -> (TempDir, AlertStore) {
    pulsewatch_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("alert.db").display());
    let store = AlertStore::new(&url, dir.path()).await.unwrap();
    (dir, store)
}

fn make_rule(id: &str, resource: &str, partition: &str) -> Rule {
    Rule {
        id: id.to_string(),
        realm: "acme".to_string(),
        name: format!("cpu on {resource}"),
        target_id: "t-1".to_string(),
        resource: resource.to_string(),
        partition: partition.to_string(),
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
        created_at: 1_700_000_000,
    }
}

fn make_event(id: &str, rule_id: &str, triggered_at: i64) -> TriggeredEvent {
    TriggeredEvent {
        id: id.to_string(),
        realm: "acme".to_string(),
        rule_id: rule_id.to_string(),
        resource: "web-01".to_string(),
        partition: String::new(),
        metric_raw_name: "cpu_usage".to_string(),
        metric_display_name: "CPU usage".to_string(),
        category: "system".to_string(),
        rule_snapshot: serde_json::json!({"id": rule_id}),
        state_snapshot: serde_json::json!({"condition": "alerting"}),
        triggered_value: 95.0,
        threshold: Some(90.0),
        severity: Severity::Crit,
        triggered_at,
        first_triggered_at: triggered_at,
        last_triggered_at: triggered_at,
        notify_state: NotifyState::Pending,
        resolved_at: None,
        resolved_value: None,
        resolved_notify_state: None,
    }
}

fn make_contact(id: &str, auto_apply: bool) -> Contact {
    Contact {
        id: id.to_string(),
        realm: "acme".to_string(),
        name: format!("contact {id}"),
        channel_type: ChannelType::Slack,
        config: serde_json::json!({"webhook_url": "https://hooks.example.com/x"}),
        enabled: true,
        severities: vec![Severity::Crit, Severity::Warn],
        auto_apply,
        max_retry: Some(5),
        retry_delay_secs: None,
    }
}

#[tokio::test]
async fn rules_round_trip_through_catalog_queries() {
    let (_dir, store) = setup().await;

    let mut disabled = make_rule("r-3", "web-01", "");
    disabled.enabled = false;
    store
        .create_rules(&[
            make_rule("r-1", "web-01", ""),
            make_rule("r-2", "web-01", "eth0"),
            disabled,
        ])
        .await
        .unwrap();

    let all = store.all_enabled_rules().await.unwrap();
    assert_eq!(all.len(), 2);

    let by_target = store.rules_for_target("acme", "web-01", "eth0").await.unwrap();
    assert_eq!(by_target.len(), 1);
    assert_eq!(by_target[0].id, "r-2");
    assert_eq!(by_target[0].thresholds.crit, Some(90.0));
    assert_eq!(by_target[0].operator, CompareOp::Gt);

    let active = store.active_rules("acme", "web-01").await.unwrap();
    assert_eq!(active.len(), 2);
    assert_eq!(store.count_rules().await.unwrap(), 3);
}

#[tokio::test]
async fn target_existence_is_scoped_by_partition() {
    let (_dir, store) = setup().await;
    store
        .create_target(Target {
            id: "t-1".to_string(),
            realm: "acme".to_string(),
            resource: "pdu-7".to_string(),
            partition: "branch-a".to_string(),
            datasource: "pdu".to_string(),
            category: "power".to_string(),
            collection_interval: 60,
            reporting_interval: 300,
            created_by: "system".to_string(),
            created_at: 1_700_000_000,
        })
        .await
        .unwrap();

    assert!(store.target_exists("acme", "pdu", "pdu-7", "branch-a").await.unwrap());
    assert!(!store.target_exists("acme", "pdu", "pdu-7", "branch-b").await.unwrap());
    assert!(!store.target_exists("other", "pdu", "pdu-7", "branch-a").await.unwrap());
}

#[tokio::test]
async fn auto_apply_templates_match_metric_and_datasource() {
    let (_dir, store) = setup().await;
    store
        .insert_metric_rule(&MetricRuleDefinition {
            id: "mr-cpu".to_string(),
            name: "cpu".to_string(),
            category: "system".to_string(),
            detection_type: DetectionType::Absolute,
            metric_raw_name: "cpu_usage".to_string(),
            metric_display_name: "CPU usage".to_string(),
            unit: "%".to_string(),
            scale: 1.0,
            operator: CompareOp::Gt,
            duration: "5m".to_string(),
            thresholds: Thresholds::default(),
            match_datasource_names: vec!["node".to_string()],
        })
        .await
        .unwrap();

    let template = |id: &str, datasource: &str, auto_apply: bool| RuleTemplate {
        id: id.to_string(),
        realm: "acme".to_string(),
        name: format!("tpl {id}"),
        datasource: datasource.to_string(),
        metric_rule_id: "mr-cpu".to_string(),
        thresholds: Thresholds {
            crit: Some(95.0),
            ..Default::default()
        },
        duration: "10m".to_string(),
        times: 2,
        silence_period: "2h".to_string(),
        auto_apply,
        enabled: true,
    };
    store.insert_rule_template(&template("tp-1", "", true)).await.unwrap();
    store.insert_rule_template(&template("tp-2", "node", true)).await.unwrap();
    store.insert_rule_template(&template("tp-3", "snmp", true)).await.unwrap();
    store.insert_rule_template(&template("tp-4", "", false)).await.unwrap();

    let found = store
        .auto_apply_templates("acme", "node", "cpu_usage")
        .await
        .unwrap();
    let mut ids: Vec<&str> = found.iter().map(|(t, _)| t.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["tp-1", "tp-2"]);
    assert_eq!(found[0].1.match_datasource_names, vec!["node".to_string()]);

    assert!(store
        .auto_apply_templates("acme", "node", "mem_usage")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn save_state_rejects_stale_versions() {
    let (_dir, store) = setup().await;

    let fresh = store.state_for_update("r-1").await.unwrap();
    assert_eq!(fresh.version, 0);

    let mut next = fresh.clone();
    next.condition = Condition::Alerting;
    next.first_triggered_at = Some(100);
    next.last_triggered_severity = Some(Severity::Warn);
    let stored = store.save_state(&fresh, &next).await.unwrap();
    assert_eq!(stored.version, 1);

    // 第二个写者仍持有 version 0 的快照
    let err = store.save_state(&fresh, &next).await.unwrap_err();
    assert!(err.is_conflict());

    let mut again = stored.clone();
    again.notify_counter = 1;
    let stored = store.save_state(&stored, &again).await.unwrap();
    assert_eq!(stored.version, 2);

    let err = store.save_state(&next_with_version(&again, 1), &again).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));

    let loaded = store.get_state("r-1").await.unwrap().unwrap();
    assert_eq!(loaded.condition, Condition::Alerting);
    assert_eq!(loaded.notify_counter, 1);
    assert_eq!(loaded.last_triggered_severity, Some(Severity::Warn));
}

fn next_with_version(state: &RuleState, version: i64) -> RuleState {
    let mut s = state.clone();
    s.version = version;
    s
}

#[tokio::test]
async fn light_update_touches_only_check_value() {
    let (_dir, store) = setup().await;
    let fresh = store.state_for_update("r-1").await.unwrap();
    let stored = store.save_state(&fresh, &fresh).await.unwrap();

    store.update_last_check_value("r-1", 42.5, 500).await.unwrap();
    let loaded = store.get_state("r-1").await.unwrap().unwrap();
    assert_eq!(loaded.last_check_value, 42.5);
    assert_eq!(loaded.version, stored.version);

    let err = store.update_last_check_value("missing", 1.0, 500).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn pending_and_resolved_event_queries() {
    let (_dir, store) = setup().await;

    store.create_triggered_event(&make_event("e-1", "r-1", 1_000)).await.unwrap();
    store.create_triggered_event(&make_event("e-2", "r-2", 5_000)).await.unwrap();
    let mut failed = make_event("e-3", "r-3", 1_500);
    failed.notify_state = NotifyState::Failed;
    store.create_triggered_event(&failed).await.unwrap();
    let mut sent = make_event("e-4", "r-4", 900);
    sent.notify_state = NotifyState::Sent;
    store.create_triggered_event(&sent).await.unwrap();

    let pending = store.pending_events(2_000).await.unwrap();
    let ids: Vec<&str> = pending.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e-1", "e-3"]);

    let open = store.open_triggered_event("r-4").await.unwrap().unwrap();
    assert_eq!(open.id, "e-4");

    assert!(store.resolve_triggered_event(&open.id, 1_200, 12.0).await.unwrap());
    assert!(!store.resolve_triggered_event(&open.id, 1_300, 13.0).await.unwrap());

    assert!(store.open_triggered_event("r-4").await.unwrap().is_none());
    let unnotified = store.resolved_unnotified(2_000).await.unwrap();
    assert_eq!(unnotified.len(), 1);
    assert_eq!(unnotified[0].resolved_value, Some(12.0));
    assert_eq!(unnotified[0].rule_snapshot["id"], "r-4");

    store
        .set_notify_state(&["e-4".to_string()], NotifyKind::Resolved, NotifyState::Solved)
        .await
        .unwrap();
    assert!(store.resolved_unnotified(2_000).await.unwrap().is_empty());

    store
        .set_notify_state(
            &["e-1".to_string(), "e-3".to_string()],
            NotifyKind::Alerting,
            NotifyState::Sent,
        )
        .await
        .unwrap();
    assert!(store.pending_events(2_000).await.unwrap().is_empty());

    let fetched = store
        .triggered_events_by_ids(&["e-3".to_string(), "e-1".to_string()])
        .await
        .unwrap();
    assert_eq!(fetched.len(), 2);
    assert!(fetched.iter().all(|e| e.notify_state == NotifyState::Sent));
}

#[tokio::test]
async fn incident_updates_leave_notify_state_alone() {
    let (_dir, store) = setup().await;
    store.create_triggered_event(&make_event("e-1", "r-1", 1_000)).await.unwrap();

    // dispatcher 已经发出告警后，引擎仍持有旧的 pending 副本
    let mut stale = store.get_triggered_event("e-1").await.unwrap().unwrap();
    store
        .set_notify_state(&["e-1".to_string()], NotifyKind::Alerting, NotifyState::Sent)
        .await
        .unwrap();

    stale.last_triggered_at = 1_600;
    stale.triggered_value = 72.0;
    stale.severity = Severity::Warn;
    stale.threshold = Some(70.0);
    store.update_triggered_event(&stale).await.unwrap();

    let loaded = store.get_triggered_event("e-1").await.unwrap().unwrap();
    assert_eq!(loaded.notify_state, NotifyState::Sent);
    assert_eq!(loaded.last_triggered_at, 1_600);
    assert_eq!(loaded.severity, Severity::Warn);
    assert_eq!(loaded.threshold, Some(70.0));
    assert_eq!(loaded.triggered_at, 1_000);

    assert!(store.resolve_triggered_event("e-1", 1_900, 40.0).await.unwrap());
    let resolved = store.get_triggered_event("e-1").await.unwrap().unwrap();
    assert_eq!(resolved.notify_state, NotifyState::Sent);
    assert_eq!(resolved.resolved_at, Some(1_900));
    assert_eq!(resolved.resolved_notify_state, Some(NotifyState::Pending));

    let missing = store.resolve_triggered_event("nope", 1_900, 0.0).await;
    assert!(matches!(missing, Err(StorageError::NotFound { .. })));
}

#[tokio::test]
async fn notify_logs_keep_error_detail_and_event_ids() {
    let (_dir, store) = setup().await;
    let mut log = NotifyLog {
        id: "n-1".to_string(),
        realm: "acme".to_string(),
        kind: NotifyKind::Alerting,
        state: NotifyState::Failed,
        contact_id: "c-1".to_string(),
        channel_type: ChannelType::Webhook,
        contact_snapshot: serde_json::json!({"name": "ops"}),
        triggered_event_ids: vec!["e-1".to_string(), "e-2".to_string()],
        retry_counter: 0,
        last_retry_at: None,
        sent_at: None,
        error: Some(pulsewatch_common::types::NotifyErrorDetail {
            time: 10,
            kind: "send".to_string(),
            message: "HTTP 502".to_string(),
            retry: 0,
        }),
        exhausted: false,
        created_at: 10,
    };
    store.create_notify_log(&log).await.unwrap();

    let failed = store.failed_notify_logs().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].triggered_event_ids.len(), 2);
    assert_eq!(failed[0].error.as_ref().unwrap().kind, "send");

    log.exhausted = true;
    store.update_notify_log(&log).await.unwrap();
    assert!(store.failed_notify_logs().await.unwrap().is_empty());
    let owned = store.failed_log_event_ids(NotifyKind::Alerting).await.unwrap();
    assert!(owned.contains("e-1") && owned.contains("e-2"));
    assert!(store
        .failed_log_event_ids(NotifyKind::Resolved)
        .await
        .unwrap()
        .is_empty());

    log.exhausted = false;
    log.state = NotifyState::Sent;
    log.retry_counter = 1;
    log.error = None;
    store.update_notify_log(&log).await.unwrap();
    assert!(store.failed_notify_logs().await.unwrap().is_empty());
    assert!(store
        .failed_log_event_ids(NotifyKind::Alerting)
        .await
        .unwrap()
        .is_empty());
    let loaded = store.get_notify_log("n-1").await.unwrap().unwrap();
    assert_eq!(loaded.retry_counter, 1);
    assert!(loaded.error.is_none());
}

#[tokio::test]
async fn contacts_bind_once_per_rule() {
    let (_dir, store) = setup().await;
    store.insert_contact(&make_contact("c-1", true)).await.unwrap();
    store.insert_contact(&make_contact("c-2", false)).await.unwrap();

    store.bind_contact_to_rule("r-1", "c-1").await.unwrap();
    store.bind_contact_to_rule("r-1", "c-1").await.unwrap();
    store.bind_contact_to_rule("r-1", "c-2").await.unwrap();

    let contacts = store.contacts_for_rule("r-1").await.unwrap();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].severities, vec![Severity::Crit, Severity::Warn]);

    let auto = store.auto_apply_contacts("acme").await.unwrap();
    assert_eq!(auto.len(), 1);
    assert_eq!(auto[0].id, "c-1");
    assert_eq!(auto[0].max_retry, Some(5));

    assert!(store.contact_by_name("acme", "contact c-2").await.unwrap().is_some());
    assert!(store.get_contact("missing").await.unwrap().is_none());
}
