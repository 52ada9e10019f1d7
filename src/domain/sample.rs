use serde::{Deserialize, Serialize};

use super::response::ErrorKind;

/// Structured trace retained for a sampled request: headers, bodies, and
/// phase timings. Populated only when the sampling policy (spec.md §4.7)
/// decides to keep the full record, not just the summary row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
    pub request_body: Vec<u8>,
    pub response_body: Vec<u8>,
    pub dns_ms: f64,
    pub connect_ms: f64,
    pub tls_ms: f64,
    pub first_byte_ms: f64,
    pub download_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub run_id: String,
    pub timestamp_ms: i64,
    pub status_code: u16,
    pub latency_ms: f64,
    pub error: Option<ErrorKind>,
    pub trace: Option<Trace>,
}
