//! Monotonic clock abstraction and the `"30s"`-style duration parser shared
//! across config loading, load profiles and script bindings.

use std::time::{Duration, Instant};

use crate::error::ValidationError;

/// A source of monotonic instants. Production code uses `SystemClock`; tests
/// can substitute a fake to drive deterministic phase timings without
/// sleeping.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Parses a duration string of the form `<digits><unit>` where unit is one of
/// `ms`, `s`, `m`, `h`. A bare number with no unit is treated as seconds.
///
/// # Errors
///
/// Returns an error if `value` is empty, has no numeric prefix, names an
/// unknown unit, overflows, or parses to zero.
pub fn parse_duration(value: &str) -> Result<Duration, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidDuration {
            value: value.to_owned(),
        });
    }

    let mut digits_len = 0usize;
    for ch in trimmed.chars() {
        if ch.is_ascii_digit() {
            digits_len = digits_len.saturating_add(1);
        } else {
            break;
        }
    }
    if digits_len == 0 {
        return Err(ValidationError::InvalidDuration {
            value: value.to_owned(),
        });
    }

    let (num_part, unit_part) = trimmed.split_at(digits_len);
    let number: u64 = num_part.parse().map_err(|_| ValidationError::InvalidDuration {
        value: value.to_owned(),
    })?;

    let unit = if unit_part.is_empty() { "s" } else { unit_part };
    let duration = match unit {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => {
            let secs = number.checked_mul(60).ok_or_else(|| ValidationError::InvalidDuration {
                value: value.to_owned(),
            })?;
            Duration::from_secs(secs)
        }
        "h" => {
            let secs = number
                .checked_mul(60)
                .and_then(|seconds| seconds.checked_mul(60))
                .ok_or_else(|| ValidationError::InvalidDuration {
                    value: value.to_owned(),
                })?;
            Duration::from_secs(secs)
        }
        _ => {
            return Err(ValidationError::InvalidDuration {
                value: value.to_owned(),
            })
        }
    };

    if duration.is_zero() {
        return Err(ValidationError::InvalidDuration {
            value: value.to_owned(),
        });
    }

    Ok(duration)
}

/// Milliseconds elapsed between two instants, saturating at zero rather than
/// panicking if `end` precedes `start` (can happen across clock sources in
/// tests).
#[must_use]
pub fn millis_between(start: Instant, end: Instant) -> u64 {
    end.saturating_duration_since(start).as_millis() as u64
}

/// Wall-clock milliseconds since the Unix epoch, for timestamps that need
/// to be meaningful across process restarts (run start/end times, metric
/// and sample timestamps) rather than relative to an arbitrary `Instant`.
#[must_use]
pub fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() -> Result<(), String> {
        assert_eq!(parse_duration("30s").map_err(|e| e.to_string())?, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn bare_number_is_seconds() -> Result<(), String> {
        assert_eq!(parse_duration("5").map_err(|e| e.to_string())?, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn parses_milliseconds() -> Result<(), String> {
        assert_eq!(parse_duration("250ms").map_err(|e| e.to_string())?, Duration::from_millis(250));
        Ok(())
    }

    #[test]
    fn parses_minutes_and_hours() -> Result<(), String> {
        assert_eq!(parse_duration("2m").map_err(|e| e.to_string())?, Duration::from_secs(120));
        assert_eq!(parse_duration("1h").map_err(|e| e.to_string())?, Duration::from_secs(3600));
        Ok(())
    }

    #[test]
    fn rejects_zero() {
        assert!(parse_duration("0s").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_duration("99999999999999999999h").is_err());
    }
}
