use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Rps,
    LatencyAvg,
    LatencyP50,
    LatencyP75,
    LatencyP90,
    LatencyP95,
    LatencyP99,
    LatencyP999,
    ErrorRate,
    TotalRequests,
    Completed,
    ConnectionsActive,
    RequestsSent,
    RequestsExpected,
    SendRate,
    Throughput,
    Backpressure,
    TestsValidating,
    TestsPassed,
    TestsFailed,
    TestsSampled,
    StatusCodes,
    TestDuration,
    SetupOverhead,
}

impl MetricName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rps => "rps",
            Self::LatencyAvg => "latency_avg",
            Self::LatencyP50 => "latency_p50",
            Self::LatencyP75 => "latency_p75",
            Self::LatencyP90 => "latency_p90",
            Self::LatencyP95 => "latency_p95",
            Self::LatencyP99 => "latency_p99",
            Self::LatencyP999 => "latency_p999",
            Self::ErrorRate => "error_rate",
            Self::TotalRequests => "total_requests",
            Self::Completed => "completed",
            Self::ConnectionsActive => "connections_active",
            Self::RequestsSent => "requests_sent",
            Self::RequestsExpected => "requests_expected",
            Self::SendRate => "send_rate",
            Self::Throughput => "throughput",
            Self::Backpressure => "backpressure",
            Self::TestsValidating => "tests_validating",
            Self::TestsPassed => "tests_passed",
            Self::TestsFailed => "tests_failed",
            Self::TestsSampled => "tests_sampled",
            Self::StatusCodes => "status_codes",
            Self::TestDuration => "test_duration",
            Self::SetupOverhead => "setup_overhead",
        }
    }

    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        Some(match value {
            "rps" => Self::Rps,
            "latency_avg" => Self::LatencyAvg,
            "latency_p50" => Self::LatencyP50,
            "latency_p75" => Self::LatencyP75,
            "latency_p90" => Self::LatencyP90,
            "latency_p95" => Self::LatencyP95,
            "latency_p99" => Self::LatencyP99,
            "latency_p999" => Self::LatencyP999,
            "error_rate" => Self::ErrorRate,
            "total_requests" => Self::TotalRequests,
            "completed" => Self::Completed,
            "connections_active" => Self::ConnectionsActive,
            "requests_sent" => Self::RequestsSent,
            "requests_expected" => Self::RequestsExpected,
            "send_rate" => Self::SendRate,
            "throughput" => Self::Throughput,
            "backpressure" => Self::Backpressure,
            "tests_validating" => Self::TestsValidating,
            "tests_passed" => Self::TestsPassed,
            "tests_failed" => Self::TestsFailed,
            "tests_sampled" => Self::TestsSampled,
            "status_codes" => Self::StatusCodes,
            "test_duration" => Self::TestDuration,
            "setup_overhead" => Self::SetupOverhead,
            _ => return None,
        })
    }
}

/// One published aggregate measurement. `labels` is non-empty only for
/// label-carrying metrics such as `status_codes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub run_id: String,
    pub timestamp_ms: i64,
    pub name: MetricName,
    pub value: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, f64>,
}

impl MetricSnapshot {
    #[must_use]
    pub fn new(run_id: impl Into<String>, timestamp_ms: i64, name: MetricName, value: f64) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp_ms,
            name,
            value,
            labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, f64>) -> Self {
        self.labels = labels;
        self
    }
}
