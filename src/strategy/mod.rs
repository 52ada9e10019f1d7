//! Load strategies (spec.md §4.4). Each strategy is a plain async function
//! rather than a boxed trait object — the coordinator knows which mode a
//! profile names and calls the matching function directly, which keeps the
//! hot dispatch path free of dynamic dispatch and avoids pulling in an
//! async-trait crate the teacher's stack doesn't use.

mod constant_closed;
mod constant_open;
mod iterations;
mod ramp_up;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::domain::{LoadProfile, LoadProfileMode, ResolvedRequest};
use crate::eventloop::EventLoop;

pub use constant_closed::run_constant_closed;
pub use constant_open::run_constant_open;
pub use iterations::run_iterations;
pub use ramp_up::run_ramp_up;

/// Cooperative stop signal the coordinator flips on `stop()`; checked by
/// strategies between dispatches, never mid-request.
pub type StopSignal = Arc<AtomicBool>;

/// Dispatches `profile` to the matching strategy function. `make_request`
/// produces one `ResolvedRequest` per dispatch — called on the strategy's
/// own task, so it may re-resolve variables per iteration when the request
/// is non-deterministic.
pub async fn run(
    profile: &LoadProfile,
    event_loop: &EventLoop,
    make_request: impl FnMut() -> ResolvedRequest + Send,
    stop: StopSignal,
) {
    match profile.mode {
        LoadProfileMode::Constant => {
            if let Some(target_rps) = profile.target_rps {
                run_constant_open(event_loop, target_rps, profile.duration_ms, make_request, stop).await;
            } else {
                let concurrency = profile.effective_concurrency();
                run_constant_closed(event_loop, concurrency, profile.duration_ms, make_request, stop).await;
            }
        }
        LoadProfileMode::RampUp => {
            run_ramp_up(event_loop, profile, make_request, stop).await;
        }
        LoadProfileMode::Iterations => {
            let iterations = profile.iterations.unwrap_or(0);
            let concurrency = profile.effective_concurrency();
            run_iterations(event_loop, iterations, concurrency, make_request, stop).await;
        }
    }
}
