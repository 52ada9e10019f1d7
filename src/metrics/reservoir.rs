//! Sampling policy and bounded reservoir (spec.md §4.7). All failures and
//! slow requests are retained unconditionally (P2); successes are sampled
//! probabilistically. Realised as the bounded priority structure spec.md
//! §9's design notes suggest: keyed by `(is_error desc, is_slow desc,
//! timestamp asc)` so overflow always evicts the least-interesting sample
//! first.

use rand::Rng;

use crate::domain::{ErrorKind, SampleRecord, Trace};

#[derive(Debug, Clone, Copy)]
pub struct SamplingPolicy {
    pub success_sample_rate: f64,
    pub slow_threshold_ms: u64,
    pub capture_timing_breakdown: bool,
    pub reservoir_capacity: usize,
}

impl SamplingPolicy {
    /// Decides whether one outcome should be retained, per spec.md §4.7.
    /// `rng` is injected so the decision is testable without flakiness.
    pub fn should_sample(&self, status: u16, error: ErrorKind, latency_ms: f64, rng: &mut impl Rng) -> bool {
        if error.is_error() || status >= 500 {
            return true;
        }
        if self.slow_threshold_ms > 0 && latency_ms >= self.slow_threshold_ms as f64 {
            return true;
        }
        if self.success_sample_rate <= 0.0 {
            return false;
        }
        rng.gen_range(0.0..100.0) < self.success_sample_rate
    }
}

/// One candidate for retention, scored by the priority spec.md §9 names.
struct Entry {
    record: SampleRecord,
    is_error: bool,
    is_slow: bool,
    timestamp_ms: i64,
}

impl Entry {
    /// Lower is more disposable: non-error, non-slow, oldest first.
    fn disposability_rank(&self) -> (bool, bool, i64) {
        (!self.is_error, !self.is_slow, i64::MAX - self.timestamp_ms)
    }
}

/// Bounded reservoir of retained samples for one run. `push` never blocks
/// and never grows past `capacity` — once full, the least interesting
/// entry already held is evicted if the newcomer ranks higher, otherwise
/// the newcomer itself is dropped.
#[derive(Default)]
pub struct SampleReservoir {
    entries: Vec<Entry>,
    capacity: usize,
}

impl SampleReservoir {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, record: SampleRecord, is_error: bool, is_slow: bool) {
        if self.capacity == 0 {
            return;
        }
        let candidate = Entry {
            timestamp_ms: record.timestamp_ms,
            is_error,
            is_slow,
            record,
        };

        if self.entries.len() < self.capacity {
            self.entries.push(candidate);
            return;
        }

        let worst_idx = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| e.disposability_rank())
            .map(|(idx, _)| idx);

        if let Some(idx) = worst_idx {
            if candidate.disposability_rank() < self.entries[idx].disposability_rank() {
                self.entries[idx] = candidate;
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains the reservoir into its retained samples, oldest first.
    pub fn into_samples(mut self) -> Vec<SampleRecord> {
        self.entries.sort_by_key(|e| e.timestamp_ms);
        self.entries.into_iter().map(|e| e.record).collect()
    }
}

/// Builds the structured trace captured alongside a sample when
/// `capture_timing_breakdown` is set, per spec.md §4.7.
#[must_use]
pub fn trace_from(response: &crate::domain::ResponseRecord) -> Trace {
    Trace {
        request_headers: response.request_headers_sent.clone(),
        response_headers: response.response_headers.clone(),
        request_body: Vec::new(),
        response_body: response.body_bytes.clone(),
        dns_ms: response.timing.dns_ms,
        connect_ms: response.timing.connect_ms,
        tls_ms: response.timing.tls_ms,
        first_byte_ms: response.timing.first_byte_ms,
        download_ms: response.timing.download_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sample(run_id: &str, ts: i64, status: u16, error: ErrorKind) -> SampleRecord {
        SampleRecord {
            run_id: run_id.to_owned(),
            timestamp_ms: ts,
            status_code: status,
            latency_ms: 10.0,
            error: if error == ErrorKind::None { None } else { Some(error) },
            trace: None,
        }
    }

    #[test]
    fn errors_always_sampled_regardless_of_rate() {
        let policy = SamplingPolicy {
            success_sample_rate: 0.0,
            slow_threshold_ms: 0,
            capture_timing_breakdown: false,
            reservoir_capacity: 10,
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(policy.should_sample(0, ErrorKind::ConnectionFailed, 5.0, &mut rng));
        assert!(policy.should_sample(503, ErrorKind::None, 5.0, &mut rng));
    }

    #[test]
    fn slow_requests_always_sampled() {
        let policy = SamplingPolicy {
            success_sample_rate: 0.0,
            slow_threshold_ms: 100,
            capture_timing_breakdown: false,
            reservoir_capacity: 10,
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(policy.should_sample(200, ErrorKind::None, 150.0, &mut rng));
        assert!(!policy.should_sample(200, ErrorKind::None, 50.0, &mut rng));
    }

    #[test]
    fn reservoir_evicts_healthy_sample_before_error_sample() {
        let mut reservoir = SampleReservoir::new(2);
        reservoir.push(sample("r", 1, 200, ErrorKind::None), false, false);
        reservoir.push(sample("r", 2, 200, ErrorKind::None), false, false);
        reservoir.push(sample("r", 3, 500, ErrorKind::ConnectionFailed), true, false);

        let samples = reservoir.into_samples();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().any(|s| s.status_code == 500));
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let mut reservoir = SampleReservoir::new(0);
        reservoir.push(sample("r", 1, 500, ErrorKind::ConnectionFailed), true, false);
        assert!(reservoir.is_empty());
    }
}
