//! End-to-end exercise of the control surface (spec.md §6) against an
//! in-process `axum::Router`, following the `tower::ServiceExt::oneshot`
//! pattern used by the pack's own `quartz-server/tests/api_tests.rs`.
//! Requests are driven at a real local HTTP server spawned on a thread,
//! grounded on the teacher's `tests/support_single.rs` fixed-response
//! test server.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use loadcore::config::RuntimeConfig;
use loadcore::control::{build_router, AppState};
use loadcore::coordinator::RunCoordinator;
use loadcore::persistence::Store;
use loadcore::script::Sandbox;
use loadcore::transport::Transport;

struct ServerHandle {
    shutdown: mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_http_server() -> Result<(String, ServerHandle), String> {
    let listener = TcpListener::bind("127.0.0.1:0").map_err(|err| err.to_string())?;
    let addr = listener.local_addr().map_err(|err| err.to_string())?;
    listener.set_nonblocking(true).map_err(|err| err.to_string())?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let handle = thread::spawn(move || loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                thread::spawn(move || handle_client(stream));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => break,
        }
    });

    Ok((format!("http://{addr}"), ServerHandle { shutdown: shutdown_tx, thread: Some(handle) }))
}

fn handle_client(mut stream: TcpStream) {
    let mut buffer = [0_u8; 1024];
    if stream.read(&mut buffer).is_err() {
        return;
    }
    let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK");
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Both);
}

async fn test_state() -> Result<AppState, String> {
    let store = Arc::new(Store::open_in_memory().await.map_err(|e| e.to_string())?);
    let transport = Arc::new(Transport::new());
    let sandbox = Arc::new(Sandbox::new(2, 500, 16 * 1024 * 1024, 1024 * 1024).map_err(|e| e.to_string())?);
    let coordinator = Arc::new(RunCoordinator::new(store.clone(), transport, sandbox));
    Ok(AppState::new(coordinator, store, RuntimeConfig::default()))
}

async fn json_body(response: axum::response::Response) -> Result<Value, String> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

fn request_template(url: &str) -> Value {
    json!({
        "method": "GET",
        "url": url,
        "headers": [],
        "body": { "kind": "none" },
        "auth": { "kind": "none" },
        "pre_script": null,
        "test_script": null,
        "timeout_ms": 2_000,
        "follow_redirects": false,
        "max_redirects": 0,
        "verify_tls": true
    })
}

#[tokio::test]
async fn full_load_run_lifecycle_through_the_control_surface() -> Result<(), String> {
    let (url, _server) = spawn_http_server()?;
    let app = build_router(test_state().await?);

    let start_body = json!({
        "template": request_template(&format!("{url}/")),
        "profile": {
            "mode": "constant",
            "duration_ms": 500,
            "target_rps": null,
            "concurrency": 4,
            "iterations": null,
            "ramp_duration_ms": null,
            "start_concurrency": null,
            "per_request_timeout_ms": 2_000,
            "success_sample_rate": 1.0,
            "slow_threshold_ms": 1_000,
            "capture_timing_breakdown": false
        },
        "comment": "control-surface lifecycle test"
    });
    let request = Request::builder()
        .method("POST")
        .uri("/runs")
        .header("content-type", "application/json")
        .body(Body::from(start_body.to_string()))
        .map_err(|e| e.to_string())?;
    let response = app.clone().oneshot(request).await.map_err(|e| e.to_string())?;
    assert_eq!(response.status(), StatusCode::OK);
    let started = json_body(response).await?;
    let run_id = started["run_id"].as_str().ok_or("missing run_id")?.to_owned();
    assert_eq!(started["status"], "pending");

    let mut status = String::new();
    for _ in 0..100 {
        let request = Request::builder()
            .uri(format!("/runs/{run_id}"))
            .body(Body::empty())
            .map_err(|e| e.to_string())?;
        let response = app.clone().oneshot(request).await.map_err(|e| e.to_string())?;
        assert_eq!(response.status(), StatusCode::OK);
        let run = json_body(response).await?;
        status = run["status"].as_str().ok_or("missing status")?.to_owned();
        if matches!(status.as_str(), "completed" | "stopped" | "failed") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, "completed");

    let request =
        Request::builder().uri(format!("/runs/{run_id}/report")).body(Body::empty()).map_err(|e| e.to_string())?;
    let response = app.clone().oneshot(request).await.map_err(|e| e.to_string())?;
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await?;
    let total = report["total_requests"].as_u64().ok_or("missing total_requests")?;
    assert!(total > 0);
    let successful = report["successful_requests"].as_u64().ok_or("missing successful_requests")?;
    let failed = report["failed_requests"].as_u64().ok_or("missing failed_requests")?;
    assert_eq!(successful + failed, total, "P1 conservation: total = successful + failed");

    let request =
        Request::builder().method("DELETE").uri(format!("/runs/{run_id}")).body(Body::empty()).map_err(|e| e.to_string())?;
    let response = app.clone().oneshot(request).await.map_err(|e| e.to_string())?;
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder().uri(format!("/runs/{run_id}")).body(Body::empty()).map_err(|e| e.to_string())?;
    let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn stop_before_completion_reports_stopped_and_halts_dispatch() -> Result<(), String> {
    let (url, _server) = spawn_http_server()?;
    let app = build_router(test_state().await?);

    let start_body = json!({
        "template": request_template(&format!("{url}/")),
        "profile": {
            "mode": "constant",
            "duration_ms": 10_000,
            "target_rps": null,
            "concurrency": 2,
            "iterations": null,
            "ramp_duration_ms": null,
            "start_concurrency": null,
            "per_request_timeout_ms": 2_000,
            "success_sample_rate": 1.0,
            "slow_threshold_ms": 1_000,
            "capture_timing_breakdown": false
        }
    });
    let request = Request::builder()
        .method("POST")
        .uri("/runs")
        .header("content-type", "application/json")
        .body(Body::from(start_body.to_string()))
        .map_err(|e| e.to_string())?;
    let response = app.clone().oneshot(request).await.map_err(|e| e.to_string())?;
    assert_eq!(response.status(), StatusCode::OK);
    let started = json_body(response).await?;
    let run_id = started["run_id"].as_str().ok_or("missing run_id")?.to_owned();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/runs/{run_id}/stop"))
        .body(Body::empty())
        .map_err(|e| e.to_string())?;
    let response = app.clone().oneshot(request).await.map_err(|e| e.to_string())?;
    assert_eq!(response.status(), StatusCode::OK);
    let stopped = json_body(response).await?;
    assert_eq!(stopped["status"], "stopped");

    let request = Request::builder().uri(format!("/runs/{run_id}")).body(Body::empty()).map_err(|e| e.to_string())?;
    let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
    let run = json_body(response).await?;
    assert_eq!(run["status"], "stopped");
    Ok(())
}

#[tokio::test]
async fn execute_request_resolves_variables_and_persists_a_design_run() -> Result<(), String> {
    let (url, _server) = spawn_http_server()?;
    let app = build_router(test_state().await?);

    let body = json!({
        "template": {
            "method": "GET",
            "url": "{{host}}/",
            "headers": [],
            "body": { "kind": "none" },
            "auth": { "kind": "none" },
            "pre_script": null,
            "test_script": null,
            "timeout_ms": 2_000,
            "follow_redirects": false,
            "max_redirects": 0,
            "verify_tls": true
        },
        "variables": { "host": url }
    });
    let request = Request::builder()
        .method("POST")
        .uri("/requests/execute")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .map_err(|e| e.to_string())?;
    let response = app.clone().oneshot(request).await.map_err(|e| e.to_string())?;
    assert_eq!(response.status(), StatusCode::OK);
    let value = json_body(response).await?;
    assert_eq!(value["response"]["status"], 200);

    let request = Request::builder().uri("/runs?type=design").body(Body::empty()).map_err(|e| e.to_string())?;
    let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
    let runs = json_body(response).await?;
    let runs = runs.as_array().ok_or("expected array")?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["type"], "design");
    Ok(())
}
