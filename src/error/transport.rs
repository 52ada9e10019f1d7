use thiserror::Error;

/// Error taxonomy for the HTTP transport (spec.md §4.2). Each variant maps to
/// exactly one `ErrorKind` carried on a `ResponseRecord` — the transport never
/// raises these as exceptions across the request boundary, it records them.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {elapsed_ms}ms (limit {timeout_ms}ms)")]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },
    #[error("connection failed: {source}")]
    ConnectionFailed {
        #[source]
        source: std::io::Error,
    },
    #[error("DNS resolution failed for '{host}': {source}")]
    DnsError {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS handshake failed: {source}")]
    SslError {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported or unknown method '{method}'")]
    InvalidMethod { method: String },
    #[error("internal transport error: {message}")]
    Internal { message: String },
}

impl TransportError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::DnsError { .. } => "dns_error",
            Self::SslError { .. } => "ssl_error",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::InvalidMethod { .. } => "invalid_method",
            Self::Internal { .. } => "internal_error",
        }
    }
}
