use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use common_metrics::track_metrics;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::app_context::AppContext;
use crate::handlers;

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_CORRELATION_ID_LEN: usize = 128;

/// Identifier tying together the logs of one request, stored as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

fn incoming_id(req: &Request<Body>, header: &str) -> Option<String> {
    let value = req.headers().get(header)?.to_str().ok()?.trim();
    (!value.is_empty() && value.len() <= MAX_CORRELATION_ID_LEN).then(|| value.to_string())
}

/// Takes the caller's `x-correlation-id` (or `x-request-id`), or generates one,
/// and echoes it on the response.
pub async fn correlation_id(mut req: Request<Body>, next: Next) -> Response {
    let id = incoming_id(&req, CORRELATION_HEADER)
        .or_else(|| incoming_id(&req, REQUEST_ID_HEADER))
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(CorrelationId(id.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

pub fn router(ctx: AppContext) -> Router {
    let recorder = ctx.coordinator.metrics().clone();
    let readiness = ctx.coordinator.readiness_handler();

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/health/connection-pool", get(handlers::connection_pool))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/_readiness",
            get(move || {
                let readiness = readiness.clone();
                async move { readiness.check().await }
            }),
        )
        .route("/_liveness", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(recorder, track_metrics))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            let correlation_id = req
                .extensions()
                .get::<CorrelationId>()
                .map(|id| id.0.as_str())
                .unwrap_or("-");
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                correlation_id = %correlation_id,
            )
        }))
        .layer(middleware::from_fn(correlation_id))
        .with_state(ctx)
}
