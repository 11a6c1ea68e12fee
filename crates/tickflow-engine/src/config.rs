//! Simulation and entity configuration, validation, and error types.
//!
//! Every struct carries `#[serde(default)]` so a partial TOML file only
//! needs the keys it changes:
//!
//! ```toml
//! ticks_per_second = 20
//! seed = 7
//!
//! [rate]
//! kind = "pid"
//!
//! [rate.pid]
//! integral = 0.5
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tickflow_core::TickDuration;
use tickflow_flow::{RateConfig, RateConfigError};

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while loading or validating configuration.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// Estimator parameters are invalid.
    #[error("rate: {0}")]
    Rate(#[from] RateConfigError),
    /// The network delay range is empty.
    #[error("min_delay {min} exceeds max_delay {max}")]
    DelayRange {
        /// Configured lower bound.
        min: TickDuration,
        /// Configured upper bound.
        max: TickDuration,
    },
    /// The per-tick event budget is zero.
    #[error("max_tick_events must be at least 1")]
    ZeroEventBudget,
    /// An entity parameter that must be positive is zero.
    #[error("{name} must be at least 1")]
    Zero {
        /// Parameter name.
        name: &'static str,
    },
    /// The TOML text could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// The configuration file could not be read.
    #[error("cannot read {path}: {reason}")]
    Io {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        reason: String,
    },
}

fn positive(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { name })
    } else {
        Ok(())
    }
}

// ── SimConfig ──────────────────────────────────────────────────────

/// Environment-wide settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Automatic tick rate of the free-running driver. Zero means manual
    /// ticking only. Default: 10.
    pub ticks_per_second: u32,
    /// Lower bound of the simulated network delay. Default: 1 tick.
    pub min_delay: TickDuration,
    /// Upper bound of the simulated network delay. Default: 5 ticks.
    pub max_delay: TickDuration,
    /// Seed for the environment RNG. Default: 0.
    pub seed: u64,
    /// Upper bound on events run in one tick's flush; the rest wait for
    /// the next tick. Default: 10 000.
    pub max_tick_events: usize,
    /// Call `tock` on every entity each time this many ticks have passed.
    /// Zero disables tocks. Default: 0.
    pub ticks_per_interval: u64,
    /// Rate estimator used by every sink and stage.
    pub rate: RateConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 10,
            min_delay: TickDuration(1),
            max_delay: TickDuration(5),
            seed: 0,
            max_tick_events: 10_000,
            ticks_per_interval: 0,
            rate: RateConfig::default(),
        }
    }
}

impl SimConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay > self.max_delay {
            return Err(ConfigError::DelayRange {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        if self.max_tick_events == 0 {
            return Err(ConfigError::ZeroEventBudget);
        }
        self.rate.validate()?;
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }
}

// ── Entity configs ─────────────────────────────────────────────────

/// Settings of a source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Ticks needed to generate one item. Default: 1.
    pub ticks_per_item: u64,
    /// Largest batch generated or emitted at once. Default: 50.
    pub max_batch_size: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            ticks_per_item: 1,
            max_batch_size: 50,
        }
    }
}

impl SourceConfig {
    /// Check parameter invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("max_batch_size", self.max_batch_size)
    }
}

/// Settings of a sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Ticks needed to consume one item. Default: 1.
    pub ticks_per_item: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { ticks_per_item: 1 }
    }
}

/// Settings of a stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Ticks needed to consume one input item. Default: 1.
    pub ticks_per_item: u64,
    /// Input items consumed per output group. Default: 1.
    pub ratio_in: u64,
    /// Output items produced per group. Default: 1.
    pub ratio_out: u64,
    /// Largest batch emitted downstream. Default: 50.
    pub max_batch_size: u64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            ticks_per_item: 1,
            ratio_in: 1,
            ratio_out: 1,
            max_batch_size: 50,
        }
    }
}

impl StageConfig {
    /// Check parameter invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("ratio_in", self.ratio_in)?;
        positive("max_batch_size", self.max_batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_flow::RateKind;

    #[test]
    fn defaults_validate() {
        assert!(SimConfig::default().validate().is_ok());
        assert!(SourceConfig::default().validate().is_ok());
        assert!(StageConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_delay_range_rejected() {
        let cfg = SimConfig {
            min_delay: TickDuration(9),
            max_delay: TickDuration(3),
            ..SimConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DelayRange {
                min: TickDuration(9),
                max: TickDuration(3),
            })
        );
    }

    #[test]
    fn zero_event_budget_rejected() {
        let cfg = SimConfig {
            max_tick_events: 0,
            ..SimConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroEventBudget));
    }

    #[test]
    fn rate_errors_are_wrapped() {
        let mut cfg = SimConfig::default();
        cfg.rate.tokens.cycle_duration = TickDuration::ZERO;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Rate(RateConfigError::ZeroCycle))
        );
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = SimConfig::from_toml_str(
            r#"
            ticks_per_second = 0
            seed = 7
            max_delay = 9

            [rate]
            kind = "pid"

            [rate.pid]
            integral = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ticks_per_second, 0);
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.min_delay, TickDuration(1));
        assert_eq!(cfg.max_delay, TickDuration(9));
        assert_eq!(cfg.rate.kind, RateKind::Pid);
        assert_eq!(cfg.rate.pid.integral, 0.5);
        assert_eq!(cfg.rate.pid.proportional, 1.0);
        assert_eq!(cfg.rate.tokens.min_tokens, 100);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        assert!(matches!(
            SimConfig::from_toml_str("seed = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn toml_values_are_validated() {
        assert!(matches!(
            SimConfig::from_toml_str("min_delay = 4\nmax_delay = 2"),
            Err(ConfigError::DelayRange { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            SimConfig::from_file("/nonexistent/tickflow.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn zero_ratio_rejected() {
        let cfg = StageConfig {
            ratio_in: 0,
            ..StageConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero { name: "ratio_in" }));
    }
}
