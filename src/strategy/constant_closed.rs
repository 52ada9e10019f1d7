use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::domain::ResolvedRequest;
use crate::eventloop::EventLoop;

use super::StopSignal;

/// Closed-model constant load: exactly `concurrency` requests in flight at
/// all times. Modelled as `concurrency` worker loops, each submitting its
/// next request as soon as its previous one completes — mirrors the
/// teacher's per-slot worker loop rather than a single scheduler thread.
pub async fn run_constant_closed(
    event_loop: &EventLoop,
    concurrency: u32,
    duration_ms: u64,
    make_request: impl FnMut() -> ResolvedRequest + Send,
    stop: StopSignal,
) {
    let start = Instant::now();
    let make_request = Arc::new(Mutex::new(make_request));
    let mut workers = Vec::new();

    for _ in 0..concurrency.max(1) {
        let make_request = make_request.clone();
        let stop = stop.clone();

        let worker = async {
            loop {
                if stop.load(Ordering::Relaxed) || start.elapsed().as_millis() as u64 >= duration_ms {
                    break;
                }
                let resolved = {
                    let mut guard = make_request.lock().await;
                    guard()
                };
                let (_id, response_future) = event_loop.submit(resolved);
                let _ = response_future.await;
            }
        };
        workers.push(worker);
    }

    futures_util::future::join_all(workers).await;
    event_loop.drain().await;
}
