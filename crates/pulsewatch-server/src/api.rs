use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use pulsewatch_alert::{AlertError, ProcessSummary};
use pulsewatch_common::types::AlertPayload;
use pulsewatch_notify::FlushSummary;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// API 错误响应
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    /// 错误码
    pub err_code: i32,
    /// 错误信息
    pub err_msg: String,
    /// 链路追踪 ID
    pub trace_id: String,
}

/// API 统一响应包裹
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 错误码（成功时为 0）
    pub err_code: i32,
    /// 错误信息（成功时为 success）
    pub err_msg: String,
    pub trace_id: String,
    /// 业务数据（有数据时返回）
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "timeout" => 1408,
        "shutting_down" => 1503,
        "storage_error" => 1501,
        "notify_error" => 1502,
        "internal_error" => 1500,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

/// 校验错误返回 400，其余一律 500
fn alert_error_response(trace_id: &str, err: &AlertError) -> Response {
    let code = match err {
        AlertError::Validation(_) => "bad_request",
        AlertError::Timeout(_) => "timeout",
        AlertError::Shutdown => "shutting_down",
        AlertError::Persistence { .. } | AlertError::Lookup(_) => "storage_error",
    };
    let status = if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    error_response(status, trace_id, code, &err.to_string())
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
struct HealthResponse {
    /// 服务版本号
    version: String,
    /// 运行时长（秒）
    uptime_secs: i64,
    /// 缓存中的规则数量
    cached_rules: usize,
    /// 正在评估的 payload 数量
    in_flight_evaluations: usize,
}

/// 获取服务健康状态。
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "服务健康状态", body = HealthResponse)
    )
)]
async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            cached_rules: state.engine.cache().len(),
            in_flight_evaluations: state.pool.in_flight(),
        },
    )
}

/// 评估结果统计
#[derive(Debug, Serialize, ToSchema)]
pub struct RunAlertResponse {
    /// 参与评估的规则数
    pub evaluated: usize,
    /// 新触发或持续告警的规则数
    pub alerting: usize,
    /// 本次恢复的规则数
    pub resolved: usize,
    /// 持久化失败的规则数
    pub failed: usize,
}

impl From<ProcessSummary> for RunAlertResponse {
    fn from(s: ProcessSummary) -> Self {
        Self {
            evaluated: s.evaluated,
            alerting: s.alerting,
            resolved: s.resolved,
            failed: s.failed,
        }
    }
}

/// 提交一批指标样本进行告警评估。
/// 请求体：`{ "metadata": { "realm", "resource", "datasource", "timestamp" }, "data": { "<metric[:partition]>": [{ "timestamp", "value" }] } }`
#[utoipa::path(
    post,
    path = "/v1/alert/run-alert",
    tag = "Alerts",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "评估完成", body = RunAlertResponse),
        (status = 400, description = "payload 校验失败", body = ApiError),
        (status = 500, description = "评估失败或超时", body = ApiError)
    )
)]
async fn run_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let payload: AlertPayload = match serde_json::from_value(body) {
        Ok(p) => p,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &format!("Invalid payload: {e}"),
            );
        }
    };

    match state.pool.submit(&payload).await {
        Ok(summary) => success_response(
            StatusCode::OK,
            &trace_id,
            RunAlertResponse::from(summary),
        ),
        Err(e) => {
            if !e.is_validation() {
                tracing::error!(
                    trace_id = %&*trace_id,
                    realm = %payload.metadata.realm,
                    resource = %payload.metadata.resource,
                    error = %e,
                    "Alert evaluation failed"
                );
            }
            alert_error_response(&trace_id, &e)
        }
    }
}

/// 通知批处理结果
#[derive(Debug, Serialize, ToSchema)]
pub struct RunNotifyResponse {
    /// 上一轮仍在执行，本次跳过
    pub skipped: bool,
    pub alerting_events: usize,
    pub resolved_events: usize,
    /// 无需通知直接标记为已处理的事件数
    pub processed_events: usize,
    pub sent_logs: usize,
    pub failed_logs: usize,
    pub retried_logs: usize,
    pub exhausted_logs: usize,
}

impl From<FlushSummary> for RunNotifyResponse {
    fn from(s: FlushSummary) -> Self {
        Self {
            skipped: s.skipped,
            alerting_events: s.alerting_events,
            resolved_events: s.resolved_events,
            processed_events: s.processed_events,
            sent_logs: s.sent_logs,
            failed_logs: s.failed_logs,
            retried_logs: s.retried_logs,
            exhausted_logs: s.exhausted_logs,
        }
    }
}

/// 立即执行一轮通知批处理（重试失败通知，发送待通知的告警与恢复事件）。
#[utoipa::path(
    post,
    path = "/v1/alert/run-notify",
    tag = "Alerts",
    responses(
        (status = 200, description = "批处理完成", body = RunNotifyResponse),
        (status = 500, description = "批处理失败", body = ApiError)
    )
)]
async fn run_notify(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.dispatcher.flush(Utc::now().timestamp()).await {
        Ok(summary) => success_response(
            StatusCode::OK,
            &trace_id,
            RunNotifyResponse::from(summary),
        ),
        Err(e) => {
            tracing::error!(trace_id = %&*trace_id, error = %e, "Notification flush failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "notify_error",
                &e.to_string(),
            )
        }
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(run_alert))
        .routes(routes!(run_notify))
}
