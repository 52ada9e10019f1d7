use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::domain::{LoadProfile, ResolvedRequest};
use crate::eventloop::EventLoop;

use super::StopSignal;

/// Ramp-up load: linearly interpolates from `start_concurrency` (closed
/// model) or zero (open model, implicit start rate) towards the profile's
/// end state over `ramp_duration_ms`, then holds the end state as Constant
/// for the remainder of `duration_ms`. Whichever of `target_rps` /
/// `concurrency` the profile sets determines which axis ramps; `validate()`
/// guarantees at least one is present.
pub async fn run_ramp_up(
    event_loop: &EventLoop,
    profile: &LoadProfile,
    mut make_request: impl FnMut() -> ResolvedRequest + Send,
    stop: StopSignal,
) {
    let start = Instant::now();
    let tick = Duration::from_millis(10);
    let ramp_duration_ms = profile.ramp_duration_ms.unwrap_or(0).max(1);
    let start_concurrency = profile.start_concurrency.unwrap_or(0);

    if let Some(end_rps) = profile.target_rps {
        let start_rps = f64::from(start_concurrency);
        let mut next_index: u64 = 0;

        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let elapsed_ms = start.elapsed().as_millis() as u64;
            if elapsed_ms >= profile.duration_ms {
                break;
            }

            let current_rps = if elapsed_ms >= ramp_duration_ms {
                end_rps
            } else {
                let ratio = elapsed_ms as f64 / ramp_duration_ms as f64;
                start_rps + (end_rps - start_rps) * ratio
            };

            let elapsed_secs = elapsed_ms as f64 / 1000.0;
            let due = (elapsed_secs * current_rps).floor().max(0.0) as u64;
            while next_index < due {
                let resolved = make_request();
                let (_id, _response_future) = event_loop.submit(resolved);
                next_index += 1;
            }

            tokio::time::sleep(tick).await;
        }
    } else {
        let end_concurrency = profile.effective_concurrency().max(1);

        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let elapsed_ms = start.elapsed().as_millis() as u64;
            if elapsed_ms >= profile.duration_ms {
                break;
            }

            let target_concurrency = if elapsed_ms >= ramp_duration_ms {
                end_concurrency
            } else {
                let ratio = elapsed_ms as f64 / ramp_duration_ms as f64;
                let span = f64::from(end_concurrency) - f64::from(start_concurrency);
                (f64::from(start_concurrency) + span * ratio).round() as u32
            };

            let stats = event_loop.stats();
            let in_flight = stats.active + stats.pending;
            if u64::from(target_concurrency) > in_flight {
                let resolved = make_request();
                let (_id, _response_future) = event_loop.submit(resolved);
            }

            tokio::time::sleep(tick).await;
        }
    }

    event_loop.drain().await;
}
