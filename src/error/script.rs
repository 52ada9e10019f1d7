use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script exceeded its wall-clock deadline ({deadline_ms}ms)")]
    DeadlineExceeded { deadline_ms: u64 },
    #[error("script exceeded the configured memory limit ({limit_bytes} bytes)")]
    MemoryLimitExceeded { limit_bytes: usize },
    #[error("script raised an exception: {message}")]
    Exception { message: String },
    #[error("script context pool exhausted")]
    PoolExhausted,
    #[error("interpreter error: {message}")]
    Interpreter { message: String },
}
