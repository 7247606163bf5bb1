use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::IntoResponse,
};

use crate::MetricsRecorder;

/// Records every request into the recorder, labelled with the matched route
/// template rather than the raw path so ids do not explode the series count.
///
/// Install with `axum::middleware::from_fn_with_state(recorder, track_metrics)`.
pub async fn track_metrics(
    State(recorder): State<Arc<MetricsRecorder>>,
    req: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let start = Instant::now();

    let route = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        "unmatched".to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    recorder.record_http_request(
        elapsed_ms,
        response.status().as_u16(),
        method.as_str(),
        &route,
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use super::track_metrics;
    use crate::MetricsRecorder;

    fn app(recorder: Arc<MetricsRecorder>) -> Router {
        Router::new()
            .route("/entries/:id", get(|| async { "ok" }))
            .route(
                "/boom",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "no") }),
            )
            .layer(axum::middleware::from_fn_with_state(recorder, track_metrics))
    }

    #[tokio::test]
    async fn labels_requests_with_route_template() {
        let recorder = Arc::new(MetricsRecorder::default());
        let app = app(recorder.clone());

        for id in ["1", "2", "3"] {
            let response = app
                .clone()
                .oneshot(Request::get(format!("/entries/{id}")).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.http.count, 3);
        assert_eq!(snapshot.series_count, 1);
        assert!(recorder
            .export_text()
            .contains("route=\"/entries/:id\",status=\"200\"} 3"));
    }

    #[tokio::test]
    async fn counts_server_errors_and_unmatched_routes() {
        let recorder = Arc::new(MetricsRecorder::default());
        let app = app(recorder.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.http_server_errors, 1);
        assert_eq!(snapshot.http_status_classes["4xx"], 1);
        assert!(recorder.export_text().contains("route=\"unmatched\""));
    }
}
