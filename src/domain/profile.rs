use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadProfileMode {
    Constant,
    RampUp,
    Iterations,
}

/// Load profile as submitted by the control surface. Mode-specific fields
/// are `Option` on the wire; `validate` enforces the combination spec.md §3
/// actually requires for the chosen `mode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadProfile {
    pub mode: LoadProfileMode,
    pub duration_ms: u64,
    pub target_rps: Option<f64>,
    pub concurrency: Option<u32>,
    pub iterations: Option<u64>,
    pub ramp_duration_ms: Option<u64>,
    pub start_concurrency: Option<u32>,
    pub per_request_timeout_ms: u64,
    #[serde(default)]
    pub success_sample_rate: f64,
    #[serde(default)]
    pub slow_threshold_ms: u64,
    #[serde(default)]
    pub capture_timing_breakdown: bool,
}

impl LoadProfile {
    /// Validates the mode-specific invariants (see the module-level
    /// `LoadProfile` docs). Call before handing the profile to the
    /// coordinator — strategies assume a valid profile and do not re-check.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending field if the combination of
    /// fields set does not match what the profile's `mode` requires.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=100.0).contains(&self.success_sample_rate) {
            return Err(ValidationError::InvalidSamplingRate {
                rate: self.success_sample_rate,
            });
        }

        match self.mode {
            LoadProfileMode::Constant => {
                let has_rps = self.target_rps.is_some();
                let has_concurrency = self.concurrency.is_some();
                if has_rps == has_concurrency {
                    return Err(ValidationError::MissingField {
                        strategy: "constant".to_owned(),
                        field: "exactly one of target_rps/concurrency".to_owned(),
                    });
                }
                if let Some(rps) = self.target_rps {
                    if rps <= 0.0 {
                        return Err(ValidationError::NotPositive {
                            field: "target_rps".to_owned(),
                            value: rps as i64,
                        });
                    }
                }
                if let Some(c) = self.concurrency {
                    if c == 0 {
                        return Err(ValidationError::NotPositive {
                            field: "concurrency".to_owned(),
                            value: 0,
                        });
                    }
                }
            }
            LoadProfileMode::RampUp => {
                if self.ramp_duration_ms.is_none() {
                    return Err(ValidationError::MissingField {
                        strategy: "ramp_up".to_owned(),
                        field: "ramp_duration_ms".to_owned(),
                    });
                }
                if self.concurrency.is_none() && self.target_rps.is_none() {
                    return Err(ValidationError::MissingField {
                        strategy: "ramp_up".to_owned(),
                        field: "concurrency or target_rps (end state)".to_owned(),
                    });
                }
            }
            LoadProfileMode::Iterations => match self.iterations {
                Some(n) if n > 0 => {}
                Some(_) => {
                    return Err(ValidationError::NotPositive {
                        field: "iterations".to_owned(),
                        value: 0,
                    })
                }
                None => {
                    return Err(ValidationError::MissingField {
                        strategy: "iterations".to_owned(),
                        field: "iterations".to_owned(),
                    })
                }
            },
        }

        Ok(())
    }

    #[must_use]
    pub fn effective_concurrency(&self) -> u32 {
        self.concurrency.unwrap_or(1)
    }
}
