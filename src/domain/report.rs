use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::sample::SampleRecord;

/// Materialised view of a finished run, built from the final aggregator
/// state plus whatever samples survived the reservoir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: super::run::RunStatus,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,

    pub latency_avg_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p75_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub latency_p999_ms: f64,

    pub status_code_histogram: BTreeMap<u16, u64>,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub errors_by_status_code: BTreeMap<u16, u64>,

    pub dns_avg_ms: Option<f64>,
    pub connect_avg_ms: Option<f64>,
    pub tls_avg_ms: Option<f64>,
    pub first_byte_avg_ms: Option<f64>,
    pub download_avg_ms: Option<f64>,

    pub slow_request_count: u64,
    pub target_rps: Option<f64>,
    pub actual_rps: f64,
    pub rate_achievement: Option<f64>,

    pub test_duration_ms: u64,
    pub setup_overhead_ms: u64,

    pub tests_passed: u64,
    pub tests_failed: u64,

    pub samples: Vec<SampleRecord>,
}

impl RunReport {
    /// I1/I2: total_requests = successful + failed, error_rate = failed / total.
    #[must_use]
    pub fn conserves_totals(&self) -> bool {
        if self.total_requests != self.successful_requests + self.failed_requests {
            return false;
        }
        if self.total_requests == 0 {
            return self.error_rate == 0.0;
        }
        let expected = self.failed_requests as f64 / self.total_requests as f64;
        (self.error_rate - expected).abs() < 1e-9
    }
}
