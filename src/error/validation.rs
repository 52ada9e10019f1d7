use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("load profile '{strategy}' requires field '{field}'")]
    MissingField { strategy: String, field: String },

    #[error("load profile '{strategy}' does not accept field '{field}'")]
    UnexpectedField { strategy: String, field: String },

    #[error("field '{field}' must be greater than zero, got {value}")]
    NotPositive { field: String, value: i64 },

    #[error("request template has no url")]
    EmptyUrl,

    #[error("invalid method '{method}'")]
    InvalidMethod { method: String },

    #[error("variable '{name}' referenced but not defined in this context")]
    UndefinedVariable { name: String },

    #[error("duration string '{value}' is not a valid duration")]
    InvalidDuration { value: String },

    #[error("sampling rate must be a percentage in [0, 100], got {rate}")]
    InvalidSamplingRate { rate: f64 },
}
