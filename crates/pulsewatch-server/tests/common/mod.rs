#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use pulsewatch_common::types::{
    AlertPayload, ChannelType, CompareOp, Contact, DetectionType, MetricSample, PayloadMetadata,
    Rule, Severity, Thresholds,
};
use pulsewatch_notify::{Message, Notifier};
use pulsewatch_server::app;
use pulsewatch_server::config::ServerConfig;
use pulsewatch_server::state::AppState;
use pulsewatch_storage::MemoryStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;

/// Notifier that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(ChannelType, Message)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(ChannelType, Message)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        channel_type: ChannelType,
        _config: &Value,
        message: &Message,
    ) -> pulsewatch_notify::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((channel_type, message.clone()));
        Ok(())
    }
}

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
    pub app: axum::Router,
}

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.notify.period_secs = 0;
    config.notify.pending_time_secs = 0;
    config.alert.evaluation_timeout_secs = 5;
    config.alert.call_timeout_secs = 2;
    config.notify.call_timeout_secs = 2;
    config
}

pub fn build_test_context() -> TestContext {
    pulsewatch_common::id::init(1, 1);

    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::with_notifier(store.clone(), notifier.clone(), test_config());
    let app = app::build_http_app(state.clone());

    TestContext {
        store,
        notifier,
        state,
        app,
    }
}

/// Rule on `web-01`/`cpu_usage` that alerts on the first crit breach.
pub fn cpu_rule(id: &str) -> Rule {
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
        duration: "0s".to_string(),
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

pub fn ops_contact(id: &str) -> Contact {
    Contact {
        id: id.to_string(),
        realm: "acme".to_string(),
        name: format!("ops {id}"),
        channel_type: ChannelType::Webhook,
        config: serde_json::json!({"url": "http://127.0.0.1:9/hook"}),
        enabled: true,
        severities: vec![Severity::Crit, Severity::Warn],
        auto_apply: false,
        max_retry: None,
        retry_delay_secs: None,
    }
}

/// Two samples a minute apart ending at `now`.
pub fn cpu_payload(now: i64, value: f64) -> AlertPayload {
    let mut data = BTreeMap::new();
    data.insert(
        "cpu_usage".to_string(),
        vec![
            MetricSample {
                timestamp: now - 60,
                value,
            },
            MetricSample {
                timestamp: now,
                value,
            },
        ],
    );
    AlertPayload {
        metadata: PayloadMetadata {
            realm: "acme".to_string(),
            resource: "web-01".to_string(),
            datasource: "node".to_string(),
            timestamp: now,
        },
        data,
    }
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    builder = builder.header("Content-Type", "application/json");

    let req = match body {
        Some(body) => builder.body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}
