use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("run '{run_id}' not found")]
    NotFound { run_id: String },
    #[error("run '{run_id}' is in state '{state}', which does not permit this operation")]
    Conflict { run_id: String, state: String },
    #[error("invalid load profile: {reason}")]
    InvalidConfig { reason: String },
    #[error("run '{run_id}' failed: {reason}")]
    Failed { run_id: String, reason: String },
}
