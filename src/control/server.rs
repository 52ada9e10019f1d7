use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use super::routes;
use super::state::AppState;

/// Builds the full `axum::Router` for the daemon's loopback control
/// surface (spec.md §6). Route paths are this implementation's own
/// choice — spec.md specifies endpoint semantics, not literal paths.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/config", get(routes::list_config).post(routes::update_config))
        .route("/requests/execute", post(routes::execute_request))
        .route("/runs", get(routes::list_runs).post(routes::start_load_test))
        .route("/runs/{id}", get(routes::get_run).delete(routes::delete_run))
        .route("/runs/{id}/stop", post(routes::stop_run))
        .route("/runs/{id}/report", get(routes::get_run_report))
        .route("/runs/{id}/stream", get(routes::stream_live_metrics))
        .fallback(routes::not_found)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(false)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::coordinator::RunCoordinator;
    use crate::persistence::Store;
    use crate::script::Sandbox;
    use crate::transport::Transport;
    use std::sync::Arc;

    async fn test_state() -> Result<AppState, String> {
        let store = Arc::new(Store::open_in_memory().await.map_err(|e| e.to_string())?);
        let transport = Arc::new(Transport::new());
        let sandbox = Arc::new(Sandbox::new(1, 500, 16 * 1024 * 1024, 1024 * 1024).map_err(|e| e.to_string())?);
        let coordinator = Arc::new(RunCoordinator::new(store.clone(), transport, sandbox));
        Ok(AppState::new(coordinator, store, RuntimeConfig::default()))
    }

    #[tokio::test]
    async fn health_reports_ok() -> Result<(), String> {
        let app = build_router(test_state().await?);
        let request = Request::builder().uri("/health").body(Body::empty()).map_err(|e| e.to_string())?;
        let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| e.to_string())?;
        assert_eq!(value["ok"], true);
        Ok(())
    }

    #[tokio::test]
    async fn config_lists_known_keys() -> Result<(), String> {
        let app = build_router(test_state().await?);
        let request = Request::builder().uri("/config").body(Body::empty()).map_err(|e| e.to_string())?;
        let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| e.to_string())?;
        let keys: Vec<&str> = value.as_array().ok_or("expected array")?.iter().filter_map(|e| e["key"].as_str()).collect();
        assert!(keys.contains(&"max_in_flight"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_run_returns_404() -> Result<(), String> {
        let app = build_router(test_state().await?);
        let request = Request::builder().uri("/runs/does-not-exist").body(Body::empty()).map_err(|e| e.to_string())?;
        let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn execute_request_against_a_closed_port_reports_an_error_response() -> Result<(), String> {
        let app = build_router(test_state().await?);
        let body = serde_json::json!({
            "template": {
                "method": "GET",
                "url": "http://127.0.0.1:1/",
                "headers": [],
                "body": { "kind": "none" },
                "auth": { "kind": "none" },
                "pre_script": null,
                "test_script": null,
                "timeout_ms": 200,
                "follow_redirects": false,
                "max_redirects": 0,
                "verify_tls": true
            }
        });
        let request = Request::builder()
            .method("POST")
            .uri("/requests/execute")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .map_err(|e| e.to_string())?;
        let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| e.to_string())?;
        assert_eq!(value["response"]["error"], "connection_failed");
        Ok(())
    }

    #[tokio::test]
    async fn start_load_test_rejects_an_invalid_profile() -> Result<(), String> {
        let app = build_router(test_state().await?);
        let body = serde_json::json!({
            "template": {
                "method": "GET",
                "url": "http://127.0.0.1:1/",
                "headers": [],
                "body": { "kind": "none" },
                "auth": { "kind": "none" },
                "pre_script": null,
                "test_script": null,
                "timeout_ms": 200,
                "follow_redirects": false,
                "max_redirects": 0,
                "verify_tls": true
            },
            "profile": {
                "mode": "constant",
                "duration_ms": 1000,
                "target_rps": null,
                "concurrency": null,
                "iterations": null,
                "ramp_duration_ms": null,
                "start_concurrency": null,
                "per_request_timeout_ms": 200,
                "success_sample_rate": 0.0,
                "slow_threshold_ms": 0,
                "capture_timing_breakdown": false
            }
        });
        let request = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .map_err(|e| e.to_string())?;
        let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
