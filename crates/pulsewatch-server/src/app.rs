use crate::state::AppState;
use crate::{api, logging};
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "pulsewatch API",
        description = "pulsewatch 告警评估与通知 REST API",
    ),
    tags(
        (name = "Health", description = "服务健康检查"),
        (name = "Alerts", description = "告警评估与通知批处理")
    )
)]
struct ApiDoc;

pub fn build_http_app(state: AppState) -> Router {
    let (router, spec) = api::routes().split_for_parts();

    let mut merged_spec = ApiDoc::openapi();
    merged_spec.merge(spec);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .with_state(state)
        .route(
            "/v1/openapi.json",
            get(move || {
                let spec = merged_spec.clone();
                async move { Json(spec) }
            }),
        )
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
