use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::ResolvedRequest;
use crate::eventloop::EventLoop;

use super::StopSignal;

/// Submits exactly `iterations` requests, honouring `concurrency` as the
/// in-flight cap (default 1). Workers pull from a shared counter until it
/// is exhausted rather than each being assigned a fixed share, so a slow
/// worker doesn't leave iterations undispatched.
pub async fn run_iterations(
    event_loop: &EventLoop,
    iterations: u64,
    concurrency: u32,
    make_request: impl FnMut() -> ResolvedRequest + Send,
    stop: StopSignal,
) {
    let remaining = Arc::new(AtomicU64::new(iterations));
    let make_request = Arc::new(Mutex::new(make_request));
    let mut workers = Vec::new();

    for _ in 0..concurrency.max(1) {
        let remaining = remaining.clone();
        let make_request = make_request.clone();
        let stop = stop.clone();

        let worker = async {
            loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let previous = remaining.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    if n == 0 {
                        None
                    } else {
                        Some(n - 1)
                    }
                });
                if previous.is_err() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HttpMethod;
    use crate::queue;
    use crate::transport::Transport;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn submits_exactly_the_requested_iterations() {
        let (queue_tx, _rx) = queue::bounded(256);
        let transport = Arc::new(Transport::new());
        let event_loop = EventLoop::new(transport, 8, queue_tx, None);
        let stop = Arc::new(AtomicBool::new(false));

        run_iterations(
            &event_loop,
            10,
            3,
            || ResolvedRequest {
                method: HttpMethod::Get,
                url: "http://127.0.0.1:1/".to_owned(),
                headers: Vec::new(),
                body: Vec::new(),
                auth: crate::domain::AuthConfig::None,
                timeout_ms: 50,
                follow_redirects: false,
                max_redirects: 0,
                verify_tls: true,
            },
            stop,
        )
        .await;

        assert_eq!(event_loop.stats().total, 10);
    }
}
