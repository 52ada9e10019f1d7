use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    Timeout,
    ConnectionFailed,
    DnsError,
    SslError,
    InvalidUrl,
    InvalidMethod,
    ScriptError,
    InternalError,
}

impl ErrorKind {
    #[must_use]
    pub fn is_error(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl Default for ErrorKind {
    fn default() -> Self {
        Self::None
    }
}

/// Phase timings in milliseconds, captured as non-negative doubles per
/// spec.md §4.2. `total_ms` aggregates every redirect hop.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timing {
    pub total_ms: f64,
    pub dns_ms: f64,
    pub connect_ms: f64,
    pub tls_ms: f64,
    pub first_byte_ms: f64,
    pub download_ms: f64,
}

/// Outcome of one executed request. Always produced — network and protocol
/// failures populate `error` and leave `status = 0` rather than being raised
/// as exceptions across the transport boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status: u16,
    pub status_text: String,
    pub response_headers: Vec<(String, String)>,
    pub body_bytes: Vec<u8>,
    pub body_size: u64,
    pub timing: Timing,
    pub request_headers_sent: Vec<(String, String)>,
    pub raw_request_bytes: u64,
    pub error: ErrorKind,
    pub error_message: Option<String>,
}

impl ResponseRecord {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error == ErrorKind::None && self.status < 500
    }

    #[must_use]
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            response_headers: Vec::new(),
            body_bytes: Vec::new(),
            body_size: 0,
            timing: Timing::default(),
            request_headers_sent: Vec::new(),
            raw_request_bytes: 0,
            error: kind,
            error_message: Some(message.into()),
        }
    }
}
