//! Cooperative scheduler issuing requests against the transport while
//! respecting an in-flight cap (spec.md §4.3). Suspension points are
//! exactly: awaiting a semaphore permit, awaiting the transport's result,
//! awaiting the optional script hooks either side of dispatch, and (for the
//! strategy driving this loop) awaiting its next scheduled departure — no
//! other hidden yields are introduced here.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::domain::{ErrorKind, ResolvedRequest, ResponseRecord};
use crate::error::ScriptError;
use crate::queue;
use crate::script::Sandbox;
use crate::script::{ScriptResult, TestOutcome};
use crate::transport::Transport;

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    active: AtomicU64,
    pending: AtomicU64,
    completed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub total: u64,
    pub active: u64,
    pub pending: u64,
    pub completed: u64,
}

/// One completed dispatch as it flows into the metrics aggregator: the
/// transport outcome plus whatever `pre_script`/`test_script` produced
/// (spec.md §4.5, §4.7). `script` is `None` whenever the run's template
/// carries no scripts at all.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub response: ResponseRecord,
    pub script: Option<ScriptResult>,
}

/// Fixed, per-run script configuration attached to an `EventLoop` at
/// construction. `pre_script`/`test_script` are the request template's
/// bodies (spec.md §4.2); `environment` is the run's shared key/value store
/// scripts read and mutate through `pm.environment`.
pub struct ScriptHooks {
    pub sandbox: Arc<Sandbox>,
    pub pre_script: Option<String>,
    pub test_script: Option<String>,
    pub environment: Arc<Mutex<BTreeMap<String, String>>>,
    pub deadline_ms: u64,
}

/// Issues requests against a shared `Transport` while holding at most
/// `max_in_flight` in flight at any time. Every completion is funnelled
/// through one dedicated pump task which is the sole producer into the
/// lock-free SPSC queue that feeds the metrics aggregator (spec.md §4.1) —
/// the many-worker-to-one-pump handoff uses an ordinary `mpsc` channel,
/// which is an internal scheduling detail, not the contract queue.
pub struct EventLoop {
    transport: Arc<Transport>,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
    cancel_flags: Arc<Mutex<HashMap<u64, Arc<AtomicBool>>>>,
    next_id: AtomicU64,
    pump_tx: mpsc::UnboundedSender<Outcome>,
    scripts: Option<Arc<ScriptHooks>>,
}

impl EventLoop {
    #[must_use]
    pub fn new(
        transport: Arc<Transport>,
        max_in_flight: usize,
        queue_tx: queue::Sender<Outcome>,
        scripts: Option<ScriptHooks>,
    ) -> Self {
        Self {
            transport,
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
            counters: Arc::new(Counters::default()),
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            pump_tx: spawn_completion_pump(queue_tx),
            scripts: scripts.map(Arc::new),
        }
    }

    /// Enqueues `resolved` for dispatch. Returns an id (for `cancel`) and a
    /// future that resolves to the eventual `ResponseRecord`. If the run
    /// carries script hooks, `pre_script` runs immediately before dispatch
    /// and `test_script` immediately after, on the blocking pool — the
    /// caller-facing future still yields only the `ResponseRecord`; the
    /// combined outcome (including script results) is what reaches the
    /// queue the aggregator drains.
    pub fn submit(
        &self,
        resolved: ResolvedRequest,
    ) -> (u64, impl std::future::Future<Output = ResponseRecord> + Send + 'static) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, cancel_flag.clone());

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.pending.fetch_add(1, Ordering::Relaxed);

        let transport = self.transport.clone();
        let semaphore = self.semaphore.clone();
        let counters = self.counters.clone();
        let cancel_flags = self.cancel_flags.clone();
        let pump_tx = self.pump_tx.clone();
        let scripts = self.scripts.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            counters.pending.fetch_sub(1, Ordering::Relaxed);

            if cancel_flag.load(Ordering::Acquire) {
                cancel_flags
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&id);
                let record = ResponseRecord::failure(ErrorKind::InternalError, "cancelled");
                let _ = pump_tx.send(Outcome { response: record.clone(), script: None });
                let _ = tx.send(record);
                return;
            }

            let Ok(_permit) = permit else { return };
            counters.active.fetch_add(1, Ordering::Relaxed);
            let outcome = dispatch_with_scripts(&transport, scripts.as_deref(), resolved).await;
            counters.active.fetch_sub(1, Ordering::Relaxed);
            counters.completed.fetch_add(1, Ordering::Relaxed);

            cancel_flags
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&id);
            let record = outcome.response.clone();
            let _ = pump_tx.send(outcome);
            let _ = tx.send(record);
        });

        let future = async move { rx.await.unwrap_or_else(|_| ResponseRecord::failure(ErrorKind::InternalError, "cancelled")) };
        (id, future)
    }

    /// Best-effort: aborts `id` if it has not yet started executing
    /// against the transport; a request already in flight is allowed to
    /// complete normally.
    pub fn cancel(&self, id: u64) {
        if let Some(flag) = self
            .cancel_flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
        {
            flag.store(true, Ordering::Release);
        }
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        Stats {
            total: self.counters.total.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
            pending: self.counters.pending.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
        }
    }

    /// Blocks until every currently tracked request has completed.
    pub async fn drain(&self) {
        loop {
            let stats = self.stats();
            if stats.active == 0 && stats.pending == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

/// Runs the optional `pre_script`, dispatches against the transport (unless
/// `pre_script` aborted it), then runs the optional `test_script`, folding
/// both halves into one `ScriptResult` (spec.md §4.5, §7): a thrown
/// exception in `pre_script` skips dispatch and reports `status = 0` with
/// `error.kind = script_error`; a thrown exception in `test_script` does
/// not retroactively fail an otherwise-successful response, it only marks
/// the combined script outcome failed.
pub(crate) async fn dispatch_with_scripts(transport: &Transport, scripts: Option<&ScriptHooks>, resolved: ResolvedRequest) -> Outcome {
    let Some(hooks) = scripts else {
        return Outcome {
            response: transport.execute(&resolved).await,
            script: None,
        };
    };

    let mut tests: Vec<TestOutcome> = Vec::new();
    let mut console_output: Vec<String> = Vec::new();

    if let Some(pre_script) = &hooks.pre_script {
        match hooks
            .sandbox
            .run_pre(pre_script.clone(), resolved.clone(), hooks.environment.clone(), hooks.deadline_ms)
            .await
        {
            Ok(result) => {
                tests.extend(result.tests);
                console_output.extend(result.console_output);
            }
            Err(err) => {
                let message = err.to_string();
                return Outcome {
                    response: ResponseRecord::failure(ErrorKind::ScriptError, message.clone()),
                    script: Some(ScriptResult::failed(tests, console_output, message)),
                };
            }
        }
    }

    let response = transport.execute(&resolved).await;

    let mut failed_reason = None;
    if let Some(test_script) = &hooks.test_script {
        match hooks
            .sandbox
            .run_test(
                test_script.clone(),
                resolved.clone(),
                response.clone(),
                hooks.environment.clone(),
                hooks.deadline_ms,
            )
            .await
        {
            Ok(result) => {
                tests.extend(result.tests);
                console_output.extend(result.console_output);
            }
            Err(err) => {
                failed_reason = Some(err.to_string());
            }
        }
    }

    let script = match failed_reason {
        Some(reason) => Some(ScriptResult::failed(tests, console_output, reason)),
        None => Some(ScriptResult::ok(tests, console_output)),
    };

    Outcome { response, script }
}

fn spawn_completion_pump(queue_tx: queue::Sender<Outcome>) -> mpsc::UnboundedSender<Outcome> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outcome>();
    tokio::spawn(async move {
        while let Some(mut outcome) = rx.recv().await {
            loop {
                match queue_tx.try_send(outcome) {
                    Ok(()) => break,
                    Err(queue::QueueFull(returned)) => {
                        outcome = returned;
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
    });
    tx
}
