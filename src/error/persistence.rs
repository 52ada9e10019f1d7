use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },
    #[error("async sqlite handle error: {source}")]
    Handle {
        #[from]
        source: tokio_rusqlite::Error,
    },
    #[error("retry budget exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },
    #[error("run '{run_id}' not found")]
    RunNotFound { run_id: String },
}
