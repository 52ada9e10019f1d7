use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::domain::ResolvedRequest;
use crate::eventloop::EventLoop;

use super::StopSignal;

/// Open-model constant load: a scheduled-departure clock dispatches the
/// k-th request at `start + k / target_rps`. Saturation in the event loop
/// never drops a departure — `EventLoop::submit` queues the dispatch behind
/// its semaphore rather than rejecting it, so a due-but-unserviced
/// departure simply accumulates as backpressure instead of being lost.
pub async fn run_constant_open(
    event_loop: &EventLoop,
    target_rps: f64,
    duration_ms: u64,
    mut make_request: impl FnMut() -> ResolvedRequest + Send,
    stop: StopSignal,
) {
    let start = Instant::now();
    let mut next_index: u64 = 0;
    let tick = Duration::from_millis(10);

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms >= duration_ms {
            break;
        }

        let elapsed_secs = elapsed_ms as f64 / 1000.0;
        let due = (elapsed_secs * target_rps).floor().max(0.0) as u64;
        while next_index < due {
            let resolved = make_request();
            // The submission's actual work runs on the task EventLoop::submit
            // spawns internally; the returned future is only needed by
            // callers that want the individual response, which the open
            // model does not — results still flow to the aggregator queue.
            let (_id, _response_future) = event_loop.submit(resolved);
            next_index += 1;
        }

        tokio::time::sleep(tick).await;
    }

    event_loop.drain().await;
}
