//! Estimator configuration and validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tickflow_core::TickDuration;

// ── PidConfig ──────────────────────────────────────────────────────

/// Gains and floor for the continuous PID rate estimator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    /// Proportional gain. Default: 1.0.
    pub proportional: f64,
    /// Integral gain, applied to the backlog-induced error. Default: 0.2.
    pub integral: f64,
    /// Derivative gain. Default: 0.0.
    pub derivative: f64,
    /// Floor on the estimated rate, in elements per second. Default: 100.
    pub min_rate: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            proportional: 1.0,
            integral: 0.2,
            derivative: 0.0,
            min_rate: 100.0,
        }
    }
}

// ── TokenConfig ────────────────────────────────────────────────────

/// Control-cycle parameters for the token generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Length of one control cycle. Default: 100 ticks.
    pub cycle_duration: TickDuration,
    /// Minimum number of tokens handed out per cycle. Default: 100.
    pub min_tokens: u64,
    /// Desired processing time of a single batch. Default: 20 ticks.
    pub desired_batch_complexity: TickDuration,
    /// Minimum items per batch, even if this pushes the batch above
    /// `desired_batch_complexity`. Default: 5.
    pub min_batch_size: u64,
    /// Batch size hint before the first measured cycle. Default: 50.
    pub initial_batch_size_hint: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            cycle_duration: TickDuration(100),
            min_tokens: 100,
            desired_batch_complexity: TickDuration(20),
            min_batch_size: 5,
            initial_batch_size_hint: 50,
        }
    }
}

// ── RateConfig ─────────────────────────────────────────────────────

/// Which estimator a consumer uses. Fixed for the lifetime of an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    /// Cycle-based token generation.
    #[default]
    Tokens,
    /// Continuous PID estimation per inbound path.
    Pid,
}

/// Complete estimator configuration for one consumer.
///
/// Both sub-configs are always present; the PID variant still uses
/// `tokens.cycle_duration`, `tokens.min_batch_size` and
/// `tokens.min_tokens` to size its credit grants.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Estimator variant.
    pub kind: RateKind,
    /// PID gains and floor.
    pub pid: PidConfig,
    /// Token cycle parameters.
    pub tokens: TokenConfig,
}

/// Invalid estimator parameters.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RateConfigError {
    /// A PID gain or the rate floor is NaN or infinite.
    #[error("pid parameter '{name}' must be finite, got {value}")]
    NonFiniteGain {
        /// Parameter name.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// The rate floor is negative.
    #[error("min_rate must be non-negative, got {value}")]
    NegativeMinRate {
        /// The rejected value.
        value: f64,
    },
    /// A control cycle of zero ticks never advances.
    #[error("cycle_duration must be at least one tick")]
    ZeroCycle,
    /// Batches must carry at least one item.
    #[error("min_batch_size must be at least 1")]
    ZeroMinBatchSize,
}

impl RateConfig {
    /// Check all parameter invariants.
    pub fn validate(&self) -> Result<(), RateConfigError> {
        let gains = [
            ("proportional", self.pid.proportional),
            ("integral", self.pid.integral),
            ("derivative", self.pid.derivative),
            ("min_rate", self.pid.min_rate),
        ];
        for (name, value) in gains {
            if !value.is_finite() {
                return Err(RateConfigError::NonFiniteGain { name, value });
            }
        }
        if self.pid.min_rate < 0.0 {
            return Err(RateConfigError::NegativeMinRate {
                value: self.pid.min_rate,
            });
        }
        if self.tokens.cycle_duration.is_zero() {
            return Err(RateConfigError::ZeroCycle);
        }
        if self.tokens.min_batch_size == 0 {
            return Err(RateConfigError::ZeroMinBatchSize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = RateConfig::default();
        assert_eq!(c.kind, RateKind::Tokens);
        assert_eq!(c.pid.proportional, 1.0);
        assert_eq!(c.pid.integral, 0.2);
        assert_eq!(c.pid.derivative, 0.0);
        assert_eq!(c.pid.min_rate, 100.0);
        assert_eq!(c.tokens.cycle_duration, TickDuration(100));
        assert_eq!(c.tokens.min_tokens, 100);
        assert_eq!(c.tokens.desired_batch_complexity, TickDuration(20));
        assert_eq!(c.tokens.min_batch_size, 5);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_nan_gain() {
        let mut c = RateConfig::default();
        c.pid.integral = f64::NAN;
        assert!(matches!(
            c.validate(),
            Err(RateConfigError::NonFiniteGain { name: "integral", .. })
        ));
    }

    #[test]
    fn rejects_zero_cycle_and_zero_batch() {
        let mut c = RateConfig::default();
        c.tokens.cycle_duration = TickDuration::ZERO;
        assert_eq!(c.validate(), Err(RateConfigError::ZeroCycle));

        let mut c = RateConfig::default();
        c.tokens.min_batch_size = 0;
        assert_eq!(c.validate(), Err(RateConfigError::ZeroMinBatchSize));
    }

    #[test]
    fn rejects_negative_floor() {
        let mut c = RateConfig::default();
        c.pid.min_rate = -1.0;
        assert_eq!(
            c.validate(),
            Err(RateConfigError::NegativeMinRate { value: -1.0 })
        );
    }
}
