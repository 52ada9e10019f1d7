use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use serde_json::json;

use crate::coordinator::StartLoadRequest;
use crate::domain::{Run, RunReport, RunStatus, RunType};

use super::dto::{
    ExecuteRequestBody, HealthBody, ListRunsQuery, StartLoadTestBody, StartLoadTestResponse,
    StopRunResponse,
};
use super::error::ApiError;
use super::state::AppState;

/// `GET /health` (spec.md §6).
pub async fn health() -> Json<HealthBody> {
    Json(HealthBody { ok: true, version: env!("CARGO_PKG_VERSION") })
}

/// `GET /config` (spec.md §6): the runtime configuration surface as listable
/// entries.
pub async fn list_config(State(state): State<AppState>) -> Json<Vec<crate::config::ConfigEntry>> {
    let config = state.current_runtime_config().await;
    Json(config.entries())
}

/// `POST /config`: applies key/value overrides to the in-memory runtime
/// configuration. Not part of spec.md's endpoint table verbatim, but
/// implied by `GET /config` being meaningfully mutable (spec.md §6's
/// configuration surface describes effect, not read-only status) and by
/// the persisted `config` table's purpose (spec.md §8).
///
/// # Errors
///
/// Returns an error if a provided value fails to persist to the `config`
/// table.
pub async fn update_config(
    State(state): State<AppState>,
    Json(overrides): Json<std::collections::BTreeMap<String, serde_json::Value>>,
) -> Result<Json<Vec<crate::config::ConfigEntry>>, ApiError> {
    {
        let mut config = state.runtime_config.write().await;
        for (key, value) in &overrides {
            config.set(key, value);
        }
    }
    for (key, value) in &overrides {
        state
            .store
            .set_value(crate::persistence::Table::Config, key, value)
            .await
            .map_err(ApiError::from)?;
    }
    let config = state.current_runtime_config().await;
    Ok(Json(config.entries()))
}

/// `POST /requests/execute` (spec.md §4.10, §6): single-shot design-mode
/// execution, persisted as a `design`-type `Run`.
///
/// # Errors
///
/// Returns an error if variable resolution fails or the design run cannot
/// be persisted.
pub async fn execute_request(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequestBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let variables = body.variable_context();
    let environment_id = body.environment_id.clone();
    let (response, script) = state
        .coordinator
        .execute_request(body.template, variables, environment_id)
        .await?;
    Ok(Json(json!({ "response": response, "script": script })))
}

/// `POST /runs` (spec.md §6): starts a load test and returns immediately.
///
/// # Errors
///
/// Returns an error if the load profile fails validation or the initial
/// run row cannot be persisted.
pub async fn start_load_test(
    State(state): State<AppState>,
    Json(body): Json<StartLoadTestBody>,
) -> Result<Json<StartLoadTestResponse>, ApiError> {
    let variables = body.variable_context();
    let config = state.current_runtime_config().await;
    let run_id = state
        .coordinator
        .start_load_test(
            StartLoadRequest {
                template: body.template,
                profile: body.profile,
                variables,
                request_id: body.request_id,
                environment_id: body.environment_id,
                comment: body.comment,
            },
            config,
        )
        .await?;
    let stream_url = format!("/runs/{run_id}/stream");
    Ok(Json(StartLoadTestResponse { run_id, status: "pending", stream_url }))
}

/// `POST /runs/:id/stop` (spec.md §6): blocks (bounded) until the run has
/// drained, then reports `stopped`.
///
/// # Errors
///
/// Returns an error if no active run has the given id.
pub async fn stop_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<StopRunResponse>, ApiError> {
    state.coordinator.stop_run(&run_id).await?;
    Ok(Json(StopRunResponse { status: "stopped" }))
}

/// `GET /runs/:id` (spec.md §6).
///
/// # Errors
///
/// Returns an error if no run has the given id.
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    let run = state.store.get_run(&run_id).await?;
    Ok(Json(run))
}

/// `GET /runs` (spec.md §6), with optional `status`/`type` filters applied
/// client-side against the full list (see `ListRunsQuery`).
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Vec<Run>>, ApiError> {
    let mut runs = state.store.list_runs().await?;
    if let Some(status) = query.status.as_deref().and_then(RunStatus::from_str_opt) {
        runs.retain(|run| run.status == status);
    }
    if let Some(run_type) = query.run_type.as_deref().and_then(RunType::from_str_opt) {
        runs.retain(|run| run.run_type == run_type);
    }
    Ok(Json(runs))
}

/// `DELETE /runs/:id` (spec.md §6): cascades to metrics and samples.
///
/// # Errors
///
/// Returns an error if the deletes fail.
pub async fn delete_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.delete_run(&run_id).await?;
    Ok(Json(json!({ "deleted": run_id })))
}

/// `GET /runs/:id/report` (spec.md §6).
///
/// # Errors
///
/// Returns an error if no run has the given id, or it has no report yet.
pub async fn get_run_report(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunReport>, ApiError> {
    let report = state
        .store
        .get_report(&run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("run '{run_id}' has no report yet")))?;
    Ok(Json(report))
}

/// `GET /runs/:id/stream` (spec.md §6, §4.10): a lazy, finite
/// server-sent-event sequence that replays every metric persisted so far
/// (backfill), then — if the run is still active — switches to the
/// in-memory broadcast fanout, and always ends with one `complete` event
/// once the run reaches a terminal status.
///
/// # Errors
///
/// Returns an error if no run has the given id.
pub async fn stream_live_metrics(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError> {
    let run = state.store.get_run(&run_id).await?;
    let backfill = state.store.list_metrics(&run_id).await?;
    let live = if run.status.is_terminal() { None } else { state.coordinator.subscribe_metrics(&run_id) };

    let backfill_events = backfill.into_iter().map(metric_event).collect::<Vec<_>>();
    let backfill_stream = stream::iter(backfill_events.into_iter().map(Ok));

    let store = state.store.clone();
    let tail = stream::unfold(StreamTail::Live { run_id: run_id.clone(), receiver: live, store }, advance_tail);

    Ok(Sse::new(backfill_stream.chain(tail)).keep_alive(KeepAlive::default()))
}

enum StreamTail {
    Live {
        run_id: String,
        receiver: Option<tokio::sync::broadcast::Receiver<crate::domain::MetricSnapshot>>,
        store: std::sync::Arc<crate::persistence::Store>,
    },
    Done,
}

async fn advance_tail(state: StreamTail) -> Option<(Result<Event, std::convert::Infallible>, StreamTail)> {
    match state {
        StreamTail::Live { run_id, receiver: Some(mut receiver), store } => {
            match receiver.recv().await {
                Ok(snapshot) => {
                    let event = metric_event(snapshot);
                    Some((Ok(event), StreamTail::Live { run_id, receiver: Some(receiver), store }))
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    Some((Ok(gap_event()), StreamTail::Live { run_id, receiver: Some(receiver), store }))
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    Some((Ok(complete_event(&store, &run_id).await), StreamTail::Done))
                }
            }
        }
        StreamTail::Live { run_id, receiver: None, store } => {
            Some((Ok(complete_event(&store, &run_id).await), StreamTail::Done))
        }
        StreamTail::Done => None,
    }
}

fn metric_event(snapshot: crate::domain::MetricSnapshot) -> Event {
    let mut payload = serde_json::to_value(&snapshot).unwrap_or_else(|_| json!({}));
    if let serde_json::Value::Object(map) = &mut payload {
        map.insert("event".to_owned(), json!("metric"));
    }
    Event::default().event("metric").data(payload.to_string())
}

fn gap_event() -> Event {
    Event::default()
        .event("gap")
        .data(json!({ "event": "gap", "message": "subscriber lagged, some snapshots were skipped" }).to_string())
}

async fn complete_event(store: &crate::persistence::Store, run_id: &str) -> Event {
    let status = store
        .get_run(run_id)
        .await
        .map(|run| run.status.as_str())
        .unwrap_or("failed");
    Event::default().event("complete").data(json!({ "event": "complete", "status": status }).to_string())
}

pub async fn not_found() -> impl IntoResponse {
    ApiError::NotFound("no route matches this path".to_owned())
}
