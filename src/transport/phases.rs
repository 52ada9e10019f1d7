//! Phase-instant bookkeeping for one request, per spec.md §4.2: dispatch,
//! DNS complete, connect complete, TLS complete, first byte, last byte.

use std::time::Instant;

use crate::domain::Timing;
use crate::time::millis_between;

#[derive(Debug, Clone, Copy)]
pub struct PhaseClock {
    pub dispatch: Instant,
    pub dns_done: Option<Instant>,
    pub connect_done: Option<Instant>,
    pub tls_done: Option<Instant>,
    pub first_byte: Option<Instant>,
    pub last_byte: Option<Instant>,
}

impl PhaseClock {
    #[must_use]
    pub fn start(now: Instant) -> Self {
        Self {
            dispatch: now,
            dns_done: None,
            connect_done: None,
            tls_done: None,
            first_byte: None,
            last_byte: None,
        }
    }

    /// Derives the `Timing` record. Any phase not reached (e.g. TLS on a
    /// plaintext connection) is left at zero rather than guessed.
    #[must_use]
    pub fn finish(&self) -> Timing {
        let last = self.last_byte.unwrap_or(self.dispatch);
        let dns_ms = self
            .dns_done
            .map(|t| millis_between(self.dispatch, t) as f64)
            .unwrap_or(0.0);
        let connect_start = self.dns_done.unwrap_or(self.dispatch);
        let connect_ms = self
            .connect_done
            .map(|t| millis_between(connect_start, t) as f64)
            .unwrap_or(0.0);
        let tls_start = self.connect_done.unwrap_or(connect_start);
        let tls_ms = self
            .tls_done
            .map(|t| millis_between(tls_start, t) as f64)
            .unwrap_or(0.0);
        let send_complete = self.tls_done.or(self.connect_done).unwrap_or(self.dispatch);
        let first_byte_ms = self
            .first_byte
            .map(|t| millis_between(send_complete, t) as f64)
            .unwrap_or(0.0);
        let download_ms = self
            .first_byte
            .map(|t| millis_between(t, last) as f64)
            .unwrap_or(0.0);
        let total_ms = millis_between(self.dispatch, last) as f64;

        Timing {
            total_ms,
            dns_ms,
            connect_ms,
            tls_ms,
            first_byte_ms,
            download_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_phases_yield_zero_timing_but_nonzero_total() {
        let start = Instant::now();
        let clock = PhaseClock {
            dispatch: start,
            dns_done: None,
            connect_done: None,
            tls_done: None,
            first_byte: None,
            last_byte: Some(start + Duration::from_millis(5)),
        };
        let timing = clock.finish();
        assert_eq!(timing.dns_ms, 0.0);
        assert_eq!(timing.connect_ms, 0.0);
        assert_eq!(timing.tls_ms, 0.0);
        assert!(timing.total_ms >= 5.0);
    }

    #[test]
    fn full_phase_sequence_is_monotonic_nonnegative() {
        let start = Instant::now();
        let clock = PhaseClock {
            dispatch: start,
            dns_done: Some(start + Duration::from_millis(2)),
            connect_done: Some(start + Duration::from_millis(5)),
            tls_done: Some(start + Duration::from_millis(10)),
            first_byte: Some(start + Duration::from_millis(15)),
            last_byte: Some(start + Duration::from_millis(20)),
        };
        let timing = clock.finish();
        assert!(timing.dns_ms >= 0.0);
        assert!(timing.connect_ms >= 0.0);
        assert!(timing.tls_ms >= 0.0);
        assert!(timing.first_byte_ms >= 0.0);
        assert!(timing.download_ms >= 0.0);
        assert!(timing.total_ms >= 20.0);
    }
}
