//! Run coordinator (spec.md §4.9): owns a run's lifecycle from `pending`
//! through to a terminal status, wiring the event loop, strategy, script
//! sandbox and metrics aggregator together for exactly one run at a time,
//! and persisting the result once the aggregator has flushed its last
//! tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::domain::{
    HttpRequestTemplate, LoadProfile, LoadProfileMode, MetricSnapshot, Run, RunReport, RunStatus,
    RunType,
};
use crate::error::CoordinatorError;
use crate::eventloop::{dispatch_with_scripts, EventLoop, ScriptHooks};
use crate::metrics::{Aggregator, SamplingPolicy};
use crate::persistence::Store;
use crate::queue;
use crate::script::{Sandbox, ScriptResult};
use crate::strategy::{self, StopSignal};
use crate::time::epoch_millis;
use crate::transport::Transport;
use crate::variables::{resolve, VariableContext};

/// Grace period between `stop()` flipping the cooperative stop signal and
/// the coordinator giving up on waiting for in-flight requests to drain
/// (spec.md §5): requests past this point are left to their own
/// per-request timeout rather than held up indefinitely.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Wall-clock budget given to one `pre_script`/`test_script` invocation.
/// Not part of the control surface's configuration table (spec.md §6) —
/// scripts are bounded independently of the transport's per-request
/// timeout since an expensive assertion shouldn't masquerade as a slow
/// response.
const SCRIPT_DEADLINE_MS: u64 = 5_000;

const METRICS_QUEUE_CAPACITY: usize = 4_096;
const SNAPSHOT_CHANNEL_CAPACITY: usize = 1_024;

/// Everything needed to start a load run, gathered by the control surface
/// before handing off — collection/environment resolution (spec.md §1
/// Non-goals) has already happened by the time this reaches the
/// coordinator.
#[derive(Debug, Clone)]
pub struct StartLoadRequest {
    pub template: HttpRequestTemplate,
    pub profile: LoadProfile,
    pub variables: VariableContext,
    pub request_id: Option<String>,
    pub environment_id: Option<String>,
    pub comment: Option<String>,
}

#[derive(Clone)]
struct RunHandle {
    stop_signal: StopSignal,
    snapshot_tx: broadcast::Sender<MetricSnapshot>,
}

/// Owns every currently active run plus the shared, long-lived resources
/// (transport, script sandbox, persistence handle) each run's event loop
/// is built against. One coordinator per daemon process.
pub struct RunCoordinator {
    store: Arc<Store>,
    transport: Arc<Transport>,
    sandbox: Arc<Sandbox>,
    runs: Arc<Mutex<HashMap<String, RunHandle>>>,
}

impl RunCoordinator {
    #[must_use]
    pub fn new(store: Arc<Store>, transport: Arc<Transport>, sandbox: Arc<Sandbox>) -> Self {
        Self {
            store,
            transport,
            sandbox,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Single-shot design-mode execution (spec.md §4.10): resolves
    /// variables, runs the request through transport and scripts exactly
    /// like a load run would, then persists a completed design-type `Run`
    /// row. No aggregator or event loop is involved — one request does
    /// not warrant the streaming pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if variable resolution fails or the run row cannot
    /// be persisted.
    pub async fn execute_request(
        &self,
        template: HttpRequestTemplate,
        variables: VariableContext,
        environment_id: Option<String>,
    ) -> Result<(crate::domain::ResponseRecord, Option<ScriptResult>), CoordinatorError> {
        let resolved = resolve(&template, &variables)
            .map_err(|err| CoordinatorError::InvalidConfig { reason: err.to_string() })?;

        let hooks = build_script_hooks(&self.sandbox, &template, &variables);
        let outcome = dispatch_with_scripts(&self.transport, hooks.as_ref(), resolved).await;

        let run_id = Uuid::new_v4().to_string();
        let now = epoch_millis();
        let run = Run {
            id: run_id,
            request_id: None,
            environment_id,
            run_type: RunType::Design,
            status: RunStatus::Completed,
            config_snapshot: serde_json::json!({ "template": &template }),
            start_time: now,
            end_time: Some(now),
        };
        self.store
            .insert_run(&run)
            .await
            .map_err(|err| CoordinatorError::Failed { run_id: run.id.clone(), reason: err.to_string() })?;

        Ok((outcome.response, outcome.script))
    }

    /// Moves a run from nonexistent straight through to `running` and
    /// spawns the task that drives it to a terminal state (spec.md §4.9
    /// steps 1-5). Returns the assigned run id immediately; the caller
    /// observes progress through `subscribe_metrics` and `get_run`.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::InvalidConfig` if the load profile fails
    /// validation, or `CoordinatorError::Failed` if the initial run row
    /// cannot be persisted.
    pub async fn start_load_test(
        &self,
        request: StartLoadRequest,
        config: crate::config::RuntimeConfig,
    ) -> Result<String, CoordinatorError> {
        request
            .profile
            .validate()
            .map_err(|err| CoordinatorError::InvalidConfig { reason: err.to_string() })?;

        let run_id = Uuid::new_v4().to_string();
        let run = Run {
            id: run_id.clone(),
            request_id: request.request_id.clone(),
            environment_id: request.environment_id.clone(),
            run_type: RunType::Load,
            status: RunStatus::Pending,
            config_snapshot: serde_json::json!({
                "template": &request.template,
                "profile": &request.profile,
                "comment": &request.comment,
            }),
            start_time: epoch_millis(),
            end_time: None,
        };
        self.store
            .insert_run(&run)
            .await
            .map_err(|err| CoordinatorError::Failed { run_id: run_id.clone(), reason: err.to_string() })?;

        let (queue_tx, queue_rx) = queue::bounded(METRICS_QUEUE_CAPACITY);
        let hooks = build_script_hooks(&self.sandbox, &request.template, &request.variables);
        let event_loop = Arc::new(EventLoop::new(self.transport.clone(), config.max_in_flight, queue_tx, hooks));

        let requests_expected = match request.profile.mode {
            LoadProfileMode::Iterations => request.profile.iterations,
            LoadProfileMode::Constant | LoadProfileMode::RampUp => None,
        };
        let policy = SamplingPolicy {
            success_sample_rate: request.profile.success_sample_rate,
            slow_threshold_ms: request.profile.slow_threshold_ms,
            capture_timing_breakdown: request.profile.capture_timing_breakdown,
            reservoir_capacity: config.sample_reservoir_size,
        };
        let aggregator = Aggregator::new(
            run_id.clone(),
            queue_rx,
            event_loop.clone(),
            policy,
            request.profile.target_rps,
            requests_expected,
        )
        .map_err(|err| CoordinatorError::Failed { run_id: run_id.clone(), reason: err.to_string() })?;

        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let stop_signal: StopSignal = Arc::new(AtomicBool::new(false));
        self.runs.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(
            run_id.clone(),
            RunHandle {
                stop_signal: stop_signal.clone(),
                snapshot_tx: snapshot_tx.clone(),
            },
        );

        self.store
            .update_run_status(&run_id, RunStatus::Running, None)
            .await
            .map_err(|err| CoordinatorError::Failed { run_id: run_id.clone(), reason: err.to_string() })?;

        let store = self.store.clone();
        let runs = self.runs.clone();
        let stats_interval_ms = config.stats_interval_ms;
        let run_id_task = run_id.clone();

        tokio::spawn(async move {
            drive_run(RunDrive {
                run_id: run_id_task,
                template: request.template,
                profile: request.profile,
                variables: request.variables,
                event_loop,
                aggregator,
                stop_signal,
                snapshot_tx,
                stats_interval_ms,
                store,
                runs,
            })
            .await;
        });

        Ok(run_id)
    }

    /// Flags a running run to stop scheduling new dispatches. The actual
    /// transition to `stopped` happens on the run's own task once its
    /// grace-period drain finishes; this call waits (bounded) for that to
    /// happen so the caller can report `stopped` back immediately, per
    /// spec.md §6's "after drain completes" contract.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::NotFound` if no active run has `run_id`.
    pub async fn stop_run(&self, run_id: &str) -> Result<(), CoordinatorError> {
        let handle = self
            .runs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(run_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound { run_id: run_id.to_owned() })?;
        handle.stop_signal.store(true, Ordering::Release);

        let deadline = STOP_GRACE_PERIOD + Duration::from_secs(2);
        let poll_interval = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        while waited < deadline {
            if let Ok(run) = self.store.get_run(run_id).await {
                if run.status.is_terminal() {
                    return Ok(());
                }
            }
            tokio::time::sleep(poll_interval).await;
            waited += poll_interval;
        }
        Ok(())
    }

    /// Live metric feed for a still-active run. Returns `None` once the
    /// run has reached a terminal state and its handle has been dropped —
    /// callers should fall back to `store.list_metrics` for backfill.
    #[must_use]
    pub fn subscribe_metrics(&self, run_id: &str) -> Option<broadcast::Receiver<MetricSnapshot>> {
        self.runs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(run_id)
            .map(|handle| handle.snapshot_tx.subscribe())
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run ids currently tracked by the coordinator (pending or running).
    /// Used by the daemon's signal handler to flag every in-flight run to
    /// stop before the process exits (spec.md §6 Process surface).
    #[must_use]
    pub fn active_run_ids(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Flags every active run to stop and waits (bounded) for each to reach
    /// a terminal state, in turn. Called once on graceful daemon shutdown.
    pub async fn shutdown_all(&self) {
        for run_id in self.active_run_ids() {
            let _ = self.stop_run(&run_id).await;
        }
    }
}

/// Everything one spawned run-driving task needs, gathered into a single
/// struct rather than a long positional parameter list.
struct RunDrive {
    run_id: String,
    template: HttpRequestTemplate,
    profile: LoadProfile,
    variables: VariableContext,
    event_loop: Arc<EventLoop>,
    aggregator: Aggregator,
    stop_signal: StopSignal,
    snapshot_tx: broadcast::Sender<MetricSnapshot>,
    stats_interval_ms: u64,
    store: Arc<Store>,
    runs: Arc<Mutex<HashMap<String, RunHandle>>>,
}

async fn drive_run(drive: RunDrive) {
    let RunDrive {
        run_id,
        template,
        profile,
        variables,
        event_loop,
        aggregator,
        stop_signal,
        snapshot_tx,
        stats_interval_ms,
        store,
        runs,
    } = drive;

    let (done_tx, done_rx) = oneshot::channel();
    let aggregator_handle = tokio::spawn(aggregator.run(stats_interval_ms, snapshot_tx, done_rx));

    let strategy_event_loop = event_loop.clone();
    let make_request = move || {
        resolve(&template, &variables).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "variable resolution failed, substituting an invalid request");
            invalid_resolved_request()
        })
    };
    strategy::run(&profile, &strategy_event_loop, make_request, stop_signal.clone()).await;

    tokio::select! {
        () = event_loop.drain() => {}
        () = tokio::time::sleep(STOP_GRACE_PERIOD) => {}
    }
    let _ = done_tx.send(());

    let report_result = aggregator_handle.await;
    let was_stopped = stop_signal.load(Ordering::Acquire);

    let (report, snapshots): (RunReport, Vec<MetricSnapshot>) = match report_result {
        Ok(result) => result,
        Err(_) => {
            let _ = store
                .update_run_status(&run_id, RunStatus::Failed, Some(epoch_millis()))
                .await;
            runs.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&run_id);
            return;
        }
    };

    if let Err(err) = store.insert_metrics_batch(snapshots).await {
        tracing::warn!(run_id, error = %err, "failed to persist metric batch");
    }
    if let Err(err) = store.insert_samples_batch(report.samples.clone()).await {
        tracing::warn!(run_id, error = %err, "failed to persist sample batch");
    }
    if let Err(err) = store.save_report(&report).await {
        tracing::warn!(run_id, error = %err, "failed to persist run report");
    }

    let all_failed = report.total_requests > 0 && report.successful_requests == 0;
    let final_status = if was_stopped {
        RunStatus::Stopped
    } else if all_failed {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    };
    if let Err(err) = store.update_run_status(&run_id, final_status, Some(epoch_millis())).await {
        tracing::warn!(run_id, error = %err, "failed to commit terminal run status");
    }

    runs.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&run_id);
}

/// Builds the per-run `ScriptHooks` an event loop dispatches through, or
/// `None` when the template carries neither `pre_script` nor
/// `test_script` — the common case, which should not pay for a sandbox
/// round trip on every request.
fn build_script_hooks(
    sandbox: &Arc<Sandbox>,
    template: &HttpRequestTemplate,
    variables: &VariableContext,
) -> Option<ScriptHooks> {
    if template.pre_script.is_none() && template.test_script.is_none() {
        return None;
    }
    let environment: BTreeMap<String, String> = variables.environment.clone();
    Some(ScriptHooks {
        sandbox: sandbox.clone(),
        pre_script: template.pre_script.clone(),
        test_script: template.test_script.clone(),
        environment: Arc::new(Mutex::new(environment)),
        deadline_ms: SCRIPT_DEADLINE_MS,
    })
}

/// Degrades a failed per-iteration variable resolution to an
/// immediately-failing request (counted by the aggregator as an error)
/// rather than panicking the strategy task — strategies call
/// `make_request` synchronously and have no error channel of their own.
fn invalid_resolved_request() -> crate::domain::ResolvedRequest {
    crate::domain::ResolvedRequest {
        method: crate::domain::HttpMethod::Get,
        url: String::new(),
        headers: Vec::new(),
        body: Vec::new(),
        auth: crate::domain::AuthConfig::None,
        timeout_ms: 1,
        follow_redirects: false,
        max_redirects: 0,
        verify_tls: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuthConfig, BodySource, HttpMethod};

    fn unreachable_template() -> HttpRequestTemplate {
        HttpRequestTemplate {
            method: HttpMethod::Get,
            url: "http://127.0.0.1:1/".to_owned(),
            headers: Vec::new(),
            body: BodySource::None,
            auth: AuthConfig::None,
            pre_script: None,
            test_script: None,
            timeout_ms: 200,
            follow_redirects: false,
            max_redirects: 0,
            verify_tls: true,
        }
    }

    async fn coordinator() -> Result<RunCoordinator, String> {
        let store = Arc::new(Store::open_in_memory().await.map_err(|e| e.to_string())?);
        let transport = Arc::new(Transport::new());
        let sandbox = Arc::new(Sandbox::new(2, 500, 16 * 1024 * 1024, 1024 * 1024).map_err(|e| e.to_string())?);
        Ok(RunCoordinator::new(store, transport, sandbox))
    }

    #[tokio::test]
    async fn execute_request_persists_a_completed_design_run() -> Result<(), String> {
        let coordinator = coordinator().await?;
        let (response, script) = coordinator
            .execute_request(unreachable_template(), VariableContext::default(), None)
            .await
            .map_err(|e| e.to_string())?;
        assert!(response.error.is_error());
        assert!(script.is_none());

        let runs = coordinator.store().list_runs().await.map_err(|e| e.to_string())?;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_type, RunType::Design);
        assert_eq!(runs[0].status, RunStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn a_failing_load_run_reaches_a_terminal_status() -> Result<(), String> {
        let coordinator = coordinator().await?;
        let profile = LoadProfile {
            mode: LoadProfileMode::Iterations,
            duration_ms: 10_000,
            target_rps: None,
            concurrency: Some(1),
            iterations: Some(3),
            ramp_duration_ms: None,
            start_concurrency: None,
            per_request_timeout_ms: 200,
            success_sample_rate: 0.0,
            slow_threshold_ms: 0,
            capture_timing_breakdown: false,
        };
        let run_id = coordinator
            .start_load_test(
                StartLoadRequest {
                    template: unreachable_template(),
                    profile,
                    variables: VariableContext::default(),
                    request_id: None,
                    environment_id: None,
                    comment: None,
                },
                crate::config::RuntimeConfig::default(),
            )
            .await
            .map_err(|e| e.to_string())?;

        let mut run = coordinator.store().get_run(&run_id).await.map_err(|e| e.to_string())?;
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !run.status.is_terminal() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            run = coordinator.store().get_run(&run_id).await.map_err(|e| e.to_string())?;
        }

        assert_eq!(run.status, RunStatus::Failed);
        let report = coordinator
            .store()
            .get_report(&run_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or("expected a persisted report")?;
        assert_eq!(report.total_requests, 3);
        Ok(())
    }
}
