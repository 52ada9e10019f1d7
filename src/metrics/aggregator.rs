//! Metrics aggregator (spec.md §4.6): the single consumer of the SPSC
//! queue. Maintains the streaming histogram, status-code/error tallies,
//! test-outcome counters and the sampling reservoir, and publishes
//! `MetricSnapshot`s on a fixed tick for the control surface's live stream
//! and for batched persistence.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::domain::{MetricName, MetricSnapshot, RunReport, RunStatus};
use crate::eventloop::{EventLoop, Outcome};
use crate::queue;
use crate::time::{epoch_millis, millis_between};

use super::histogram::LatencyHistogram;
use super::reservoir::{trace_from, SamplingPolicy, SampleReservoir};

#[derive(Default)]
struct Totals {
    total: u64,
    successful: u64,
    failed: u64,
    status_codes: BTreeMap<u16, u64>,
    errors_by_kind: BTreeMap<String, u64>,
    errors_by_status: BTreeMap<u16, u64>,
    slow_count: u64,
    dns_sum_ms: f64,
    connect_sum_ms: f64,
    tls_sum_ms: f64,
    first_byte_sum_ms: f64,
    download_sum_ms: f64,
    timed_count: u64,
    tests_run: u64,
    tests_passed: u64,
    tests_failed: u64,
    tests_sampled: u64,
}

/// Consumes one run's `Outcome`s to completion. Holds its own histogram and
/// reservoir rather than sharing them across runs — each run gets a fresh
/// aggregator, matching the one-`EventLoop`-per-run lifecycle the
/// coordinator drives.
pub struct Aggregator {
    run_id: String,
    queue_rx: queue::Receiver<Outcome>,
    event_loop: Arc<EventLoop>,
    histogram: LatencyHistogram,
    reservoir: SampleReservoir,
    policy: SamplingPolicy,
    totals: Totals,
    target_rps: Option<f64>,
    requests_expected: Option<u64>,
    created_at: Instant,
    first_outcome_at: Option<Instant>,
}

impl Aggregator {
    /// # Errors
    ///
    /// Returns an error if the underlying histogram fails to initialise.
    pub fn new(
        run_id: impl Into<String>,
        queue_rx: queue::Receiver<Outcome>,
        event_loop: Arc<EventLoop>,
        policy: SamplingPolicy,
        target_rps: Option<f64>,
        requests_expected: Option<u64>,
    ) -> Result<Self, crate::error::PersistenceError> {
        Ok(Self {
            run_id: run_id.into(),
            queue_rx,
            event_loop,
            histogram: LatencyHistogram::new()?,
            reservoir: SampleReservoir::new(policy.reservoir_capacity),
            policy,
            totals: Totals::default(),
            target_rps,
            requests_expected,
            created_at: Instant::now(),
            first_outcome_at: None,
        })
    }

    /// Runs the emission loop until `done_rx` resolves — the coordinator
    /// fires it only after the strategy has finished dispatching *and* the
    /// event loop has drained, so the final tick below observes every
    /// outcome the run will ever produce (spec.md §4.8's flush-before-
    /// terminal-transition guarantee starts here; the coordinator commits
    /// the terminal status only after this future resolves).
    pub async fn run(
        mut self,
        stats_interval_ms: u64,
        snapshot_tx: broadcast::Sender<MetricSnapshot>,
        mut done_rx: oneshot::Receiver<()>,
    ) -> (RunReport, Vec<MetricSnapshot>) {
        let mut ticker = interval(Duration::from_millis(stats_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rng = StdRng::seed_from_u64(epoch_millis() as u64);
        let mut all_snapshots = Vec::new();
        let mut last_total_dispatched = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let drained = self.drain_queue(&mut rng);
                    last_total_dispatched = self.emit_tick(&snapshot_tx, &mut all_snapshots, stats_interval_ms, drained, last_total_dispatched);
                }
                _ = &mut done_rx => break,
            }
        }

        let drained = self.drain_queue(&mut rng);
        self.emit_tick(&snapshot_tx, &mut all_snapshots, stats_interval_ms, drained, last_total_dispatched);

        let report = self.build_report();
        (report, all_snapshots)
    }

    /// Drains every outcome currently queued, folding each into the running
    /// totals, histogram and reservoir. Returns the count drained (used for
    /// this tick's `throughput`).
    fn drain_queue(&mut self, rng: &mut StdRng) -> u64 {
        let mut batch = Vec::new();
        self.queue_rx.drain_into(&mut batch);
        let count = batch.len() as u64;
        for outcome in batch {
            self.fold(outcome, rng);
        }
        count
    }

    fn fold(&mut self, outcome: Outcome, rng: &mut StdRng) {
        if self.first_outcome_at.is_none() {
            self.first_outcome_at = Some(Instant::now());
        }

        let response = &outcome.response;
        self.totals.total += 1;
        if response.is_success() {
            self.totals.successful += 1;
        } else {
            self.totals.failed += 1;
        }

        if response.status != 0 {
            *self.totals.status_codes.entry(response.status).or_insert(0) += 1;
        }
        if response.error.is_error() {
            *self.totals.errors_by_kind.entry(format!("{:?}", response.error)).or_insert(0) += 1;
            if response.status != 0 {
                *self.totals.errors_by_status.entry(response.status).or_insert(0) += 1;
            }
        }

        let latency_ms = response.timing.total_ms;
        self.histogram.record_ms(latency_ms);

        if response.status != 0 {
            self.totals.timed_count += 1;
            self.totals.dns_sum_ms += response.timing.dns_ms;
            self.totals.connect_sum_ms += response.timing.connect_ms;
            self.totals.tls_sum_ms += response.timing.tls_ms;
            self.totals.first_byte_sum_ms += response.timing.first_byte_ms;
            self.totals.download_sum_ms += response.timing.download_ms;
        }

        let is_slow = self.policy.slow_threshold_ms > 0 && latency_ms >= self.policy.slow_threshold_ms as f64;
        if is_slow {
            self.totals.slow_count += 1;
        }

        if let Some(script) = &outcome.script {
            self.totals.tests_run += 1;
            for test in &script.tests {
                if test.passed {
                    self.totals.tests_passed += 1;
                } else {
                    self.totals.tests_failed += 1;
                }
            }
        }

        let is_error = response.error.is_error() || response.status >= 500;
        let should_sample = self
            .policy
            .should_sample(response.status, response.error, latency_ms, rng);

        if should_sample {
            if outcome.script.is_some() {
                self.totals.tests_sampled += 1;
            }
            let trace = self.policy.capture_timing_breakdown.then(|| trace_from(response));
            let record = crate::domain::SampleRecord {
                run_id: self.run_id.clone(),
                timestamp_ms: epoch_millis(),
                status_code: response.status,
                latency_ms,
                error: response.error.is_error().then_some(response.error),
                trace,
            };
            self.reservoir.push(record, is_error, is_slow);
        }
    }

    /// Emits one tick's worth of `MetricSnapshot`s and returns the
    /// dispatched-total observed, so the next tick can derive `send_rate`.
    fn emit_tick(
        &self,
        snapshot_tx: &broadcast::Sender<MetricSnapshot>,
        all_snapshots: &mut Vec<MetricSnapshot>,
        stats_interval_ms: u64,
        responses_this_tick: u64,
        last_total_dispatched: u64,
    ) -> u64 {
        let stats = self.event_loop.stats();
        let timestamp_ms = epoch_millis();
        let interval_secs = (stats_interval_ms.max(1) as f64) / 1000.0;
        let send_rate = (stats.total.saturating_sub(last_total_dispatched)) as f64 / interval_secs;
        let throughput = responses_this_tick as f64 / interval_secs;
        let backpressure = stats.total.saturating_sub(stats.completed) as f64;

        let mut push = |name: MetricName, value: f64| {
            let snapshot = MetricSnapshot::new(self.run_id.clone(), timestamp_ms, name, value);
            let _ = snapshot_tx.send(snapshot.clone());
            all_snapshots.push(snapshot);
        };

        push(MetricName::Rps, throughput);
        push(MetricName::SendRate, send_rate);
        push(MetricName::Throughput, throughput);
        push(MetricName::Backpressure, backpressure);
        push(MetricName::TotalRequests, self.totals.total as f64);
        push(MetricName::Completed, stats.completed as f64);
        push(MetricName::ConnectionsActive, stats.active as f64);
        push(MetricName::RequestsSent, stats.total as f64);
        if let Some(expected) = self.requests_expected {
            push(MetricName::RequestsExpected, expected as f64);
        }
        push(
            MetricName::ErrorRate,
            if self.totals.total == 0 {
                0.0
            } else {
                self.totals.failed as f64 / self.totals.total as f64
            },
        );
        push(MetricName::LatencyAvg, self.histogram.mean_ms());
        push(MetricName::LatencyP50, self.histogram.value_at_quantile_ms(0.50));
        push(MetricName::LatencyP75, self.histogram.value_at_quantile_ms(0.75));
        push(MetricName::LatencyP90, self.histogram.value_at_quantile_ms(0.90));
        push(MetricName::LatencyP95, self.histogram.value_at_quantile_ms(0.95));
        push(MetricName::LatencyP99, self.histogram.value_at_quantile_ms(0.99));
        push(MetricName::LatencyP999, self.histogram.value_at_quantile_ms(0.999));
        push(MetricName::TestsValidating, (self.totals.tests_passed + self.totals.tests_failed) as f64);
        push(MetricName::TestsPassed, self.totals.tests_passed as f64);
        push(MetricName::TestsFailed, self.totals.tests_failed as f64);
        push(MetricName::TestsSampled, self.totals.tests_sampled as f64);

        if !self.totals.status_codes.is_empty() {
            let labels = self
                .totals
                .status_codes
                .iter()
                .map(|(code, count)| (code.to_string(), *count as f64))
                .collect::<BTreeMap<_, _>>();
            let snapshot = MetricSnapshot::new(self.run_id.clone(), timestamp_ms, MetricName::StatusCodes, self.totals.total as f64)
                .with_labels(labels);
            let _ = snapshot_tx.send(snapshot.clone());
            all_snapshots.push(snapshot);
        }

        stats.total
    }

    fn build_report(self) -> RunReport {
        let total = self.totals.total;
        let error_rate = if total == 0 { 0.0 } else { self.totals.failed as f64 / total as f64 };
        let test_duration_ms = millis_between(self.created_at, Instant::now());
        let setup_overhead_ms = self
            .first_outcome_at
            .map(|at| millis_between(self.created_at, at))
            .unwrap_or(0);
        let actual_rps = if test_duration_ms == 0 {
            0.0
        } else {
            total as f64 / (test_duration_ms as f64 / 1000.0)
        };
        let rate_achievement = self.target_rps.map(|target| if target <= 0.0 { 0.0 } else { actual_rps / target });
        let timed_avg = |sum: f64| if self.totals.timed_count == 0 { None } else { Some(sum / self.totals.timed_count as f64) };
        let errors_by_kind = self
            .totals
            .errors_by_kind
            .into_iter()
            .collect::<BTreeMap<_, _>>();

        RunReport {
            run_id: self.run_id,
            status: RunStatus::Completed,
            total_requests: total,
            successful_requests: self.totals.successful,
            failed_requests: self.totals.failed,
            error_rate,
            latency_avg_ms: self.histogram.mean_ms(),
            latency_p50_ms: self.histogram.value_at_quantile_ms(0.50),
            latency_p75_ms: self.histogram.value_at_quantile_ms(0.75),
            latency_p90_ms: self.histogram.value_at_quantile_ms(0.90),
            latency_p95_ms: self.histogram.value_at_quantile_ms(0.95),
            latency_p99_ms: self.histogram.value_at_quantile_ms(0.99),
            latency_p999_ms: self.histogram.value_at_quantile_ms(0.999),
            status_code_histogram: self.totals.status_codes,
            errors_by_kind,
            errors_by_status_code: self.totals.errors_by_status,
            dns_avg_ms: timed_avg(self.totals.dns_sum_ms),
            connect_avg_ms: timed_avg(self.totals.connect_sum_ms),
            tls_avg_ms: timed_avg(self.totals.tls_sum_ms),
            first_byte_avg_ms: timed_avg(self.totals.first_byte_sum_ms),
            download_avg_ms: timed_avg(self.totals.download_sum_ms),
            slow_request_count: self.totals.slow_count,
            target_rps: self.target_rps,
            actual_rps,
            rate_achievement,
            test_duration_ms,
            setup_overhead_ms,
            tests_passed: self.totals.tests_passed,
            tests_failed: self.totals.tests_failed,
            samples: self.reservoir.into_samples(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, ResponseRecord, Timing};
    use crate::transport::Transport;

    fn ok_outcome(status: u16, total_ms: f64) -> Outcome {
        Outcome {
            response: ResponseRecord {
                status,
                status_text: "OK".to_owned(),
                response_headers: Vec::new(),
                body_bytes: Vec::new(),
                body_size: 0,
                timing: Timing {
                    total_ms,
                    ..Timing::default()
                },
                request_headers_sent: Vec::new(),
                raw_request_bytes: 0,
                error: ErrorKind::None,
                error_message: None,
            },
            script: None,
        }
    }

    fn policy() -> SamplingPolicy {
        SamplingPolicy {
            success_sample_rate: 100.0,
            slow_threshold_ms: 0,
            capture_timing_breakdown: false,
            reservoir_capacity: 100,
        }
    }

    #[tokio::test]
    async fn aggregator_conserves_totals_across_a_short_run() -> Result<(), String> {
        let (queue_tx, queue_rx) = queue::bounded(64);
        for i in 0..10 {
            queue_tx
                .try_send(ok_outcome(if i % 3 == 0 { 500 } else { 200 }, 5.0))
                .map_err(|_| "queue unexpectedly full".to_owned())?;
        }
        let transport = Arc::new(Transport::new());
        let event_loop = Arc::new(EventLoop::new(transport, 8, queue::bounded(8).0, None));
        let aggregator = Aggregator::new("run-1", queue_rx, event_loop, policy(), None, None).map_err(|e| e.to_string())?;

        let (snapshot_tx, _rx) = broadcast::channel(64);
        let (done_tx, done_rx) = oneshot::channel();
        let _ = done_tx.send(());

        let (report, snapshots) = aggregator.run(50, snapshot_tx, done_rx).await;
        assert_eq!(report.total_requests, 10);
        assert!(report.conserves_totals());
        assert!(!snapshots.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_outcomes_are_tallied_separately_from_response_status() -> Result<(), String> {
        use crate::script::{ScriptResult, TestOutcome};

        let (queue_tx, queue_rx) = queue::bounded(8);
        let mut outcome = ok_outcome(200, 5.0);
        outcome.script = Some(ScriptResult::ok(
            vec![TestOutcome {
                name: "ok".to_owned(),
                passed: true,
                error_message: None,
            }],
            Vec::new(),
        ));
        queue_tx.try_send(outcome).map_err(|_| "queue unexpectedly full".to_owned())?;

        let transport = Arc::new(Transport::new());
        let event_loop = Arc::new(EventLoop::new(transport, 8, queue::bounded(8).0, None));
        let aggregator = Aggregator::new("run-2", queue_rx, event_loop, policy(), None, None).map_err(|e| e.to_string())?;

        let (snapshot_tx, _rx) = broadcast::channel(64);
        let (done_tx, done_rx) = oneshot::channel();
        let _ = done_tx.send(());

        let (report, _snapshots) = aggregator.run(50, snapshot_tx, done_rx).await;
        assert_eq!(report.tests_passed, 1);
        assert_eq!(report.tests_failed, 0);
        Ok(())
    }
}
