use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::RuntimeConfig;
use crate::coordinator::RunCoordinator;
use crate::persistence::Store;

/// Shared state handed to every `axum` handler. Cheap to clone — every
/// field is already an `Arc` (or wraps one), matching `axum`'s
/// clone-per-request `State` extractor convention.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RunCoordinator>,
    pub store: Arc<Store>,
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
}

impl AppState {
    #[must_use]
    pub fn new(coordinator: Arc<RunCoordinator>, store: Arc<Store>, runtime_config: RuntimeConfig) -> Self {
        Self {
            coordinator,
            store,
            runtime_config: Arc::new(RwLock::new(runtime_config)),
        }
    }

    /// Snapshot of the runtime configuration at this instant — load
    /// profile submission reads this once at the start of a run rather
    /// than holding the lock for the run's lifetime.
    pub async fn current_runtime_config(&self) -> RuntimeConfig {
        *self.runtime_config.read().await
    }
}
