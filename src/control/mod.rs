//! Loopback HTTP control surface (spec.md §4.10, §6): thin `axum` handlers
//! that translate external calls into `RunCoordinator` operations and
//! stream live metrics back out. Route strings and JSON envelopes are this
//! implementation's own choice — spec.md leaves the wire format open and
//! specifies only the semantics each endpoint must provide.

mod dto;
mod error;
mod routes;
mod server;
mod state;

pub use server::build_router;
pub use state::AppState;
