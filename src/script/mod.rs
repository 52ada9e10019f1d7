//! Embedded script sandbox (spec.md §4.5): runs `pre_script`/`test_script`
//! bodies with a fixed `pm`/`console` API surface, isolated per call in a
//! pooled QuickJS context and off the async reactor.

mod api;
mod pool;
mod result;
mod sandbox;

pub use result::{ScriptResult, TestOutcome};
pub use sandbox::Sandbox;
