//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod proposals;
mod review;
mod sync;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    extract::State,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Read model
        .route("/api/proposals", get(proposals::list_proposals))
        .route("/api/proposals/{id}", get(proposals::get_proposal))
        .route("/api/proposals/{id}/resequence", post(proposals::resequence_proposal))
        .route("/api/developments", get(proposals::list_developments))
        .route("/api/stats", get(proposals::get_stats))

        // Source batches
        .route("/api/sync/government", post(sync::sync_government))
        .route("/api/sync/parliamentary", post(sync::sync_parliamentary))
        .route("/api/sync/runs", get(sync::list_sync_runs))

        // Manual review & incidents
        .route("/api/review-queue", get(review::list_review_queue))
        .route("/api/review/{id}/confirm", post(review::confirm_link))
        .route("/api/review/{id}/dismiss", post(review::dismiss_link))
        .route("/api/incidents", get(review::list_incidents))

        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}

/// Health check endpoint
async fn health_check(State(state): State<SharedState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "storage": state.storage(),
        "proposals": state.store.count().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::pipeline::SyncService;
    use crate::proposal::ProposalStore;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn app() -> Router {
        let sync = SyncService::new(
            Arc::new(ProposalStore::new()),
            None,
            &SyncConfig::default(),
            CancellationToken::new(),
        )
        .unwrap();
        let settings = Settings::from_lookup(|_| None).unwrap();
        create_router(Arc::new(AppState::new(sync, None)), &settings)
    }

    #[tokio::test]
    async fn test_health_reports_storage() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_proposal_is_not_found() {
        let uri = format!("/api/proposals/{}", uuid::Uuid::new_v4());
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_batch_round_trip() {
        let app = app();
        let body = serde_json::json!({
            "records": [{
                "sourceId": "12345",
                "registryRef": "RM-0610-136-25",
                "title": "Projekt ustawy o zdrowiu",
                "stages": [{"seq": 1, "name": "Przygotowanie projektu", "active": true}]
            }]
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/sync/government")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/api/proposals").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_bad_stage_date_does_not_reject_the_batch() {
        let app = app();
        let body = serde_json::json!({
            "records": [
                {
                    "sourceId": "10/1604",
                    "registryRef": "RM-0610-136-25",
                    "stages": [
                        {"seq": 1, "type": "Reading", "name": "I czytanie", "date": "31-13-2025"},
                        {"seq": 2, "type": "Reading", "name": "II czytanie", "date": "2025-06-02"}
                    ]
                },
                {
                    "sourceId": "10/1700",
                    "registryRef": "RM-0610-200-25",
                    "stages": [{"seq": 1, "type": "Reading", "name": "I czytanie"}]
                }
            ]
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/sync/parliamentary")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let report = json_body(response).await;
        assert_eq!(report["data"]["created"], 2);
        let issues = report["data"]["issues"].as_array().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["kind"], "validation");
        assert_eq!(issues[0]["item"], "parliamentary stage 1");

        let response = app
            .oneshot(Request::builder().uri("/api/sync/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let runs = json_body(response).await;
        assert_eq!(runs["data"][1]["sourceKind"], "parliamentary");
        assert_eq!(runs["data"][1]["latest"]["status"], "completed");
        assert!(runs["data"][0]["latest"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_limit_is_bad_request() {
        let response = app()
            .oneshot(Request::builder().uri("/api/proposals?limit=0").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
