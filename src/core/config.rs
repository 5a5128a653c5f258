//! # Engine configuration.
//!
//! [`EngineConfig`] centralizes the knobs of the grab engine. Every field has
//! a default, so a TOML file only needs the values it overrides:
//!
//! ```toml
//! jitter_spread_secs = 10
//! grace_secs = 5
//!
//! [cpu_shapes]
//! ARM = "VM.Standard.A1.Flex"
//! INTEL = "VM.Standard3.Flex"
//! ```
//!
//! ## Sentinel values
//! - `running_poll_attempts = 0` is treated as 1 (at least one state read)
//! - `bus_capacity = 0` is treated as 1
//! - `grace_secs = 0` means shutdown does not wait for executors

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::policies::{RetryPolicy, WaitJitter};
use crate::provider::PollPolicy;
use crate::trigger::CpuShapeMap;

/// Shortest generated root password accepted by [`EngineConfig::validate`].
const MIN_PASSWORD_LENGTH: usize = 12;

/// Configuration of the grab engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds added to / subtracted from a task's base wait.
    pub jitter_spread_secs: u64,
    /// Lowest wait between attempts, in seconds.
    pub min_wait_secs: u64,
    /// State reads while waiting for a new instance to run.
    pub running_poll_attempts: u32,
    /// Pause between those reads, in seconds.
    pub running_poll_interval_secs: u64,
    /// Length of generated root passwords.
    pub password_length: usize,
    /// Event bus ring buffer size.
    pub bus_capacity: usize,
    /// Maximum time shutdown waits for executors to exit, in seconds.
    pub grace_secs: u64,
    /// Pub/sub channel carrying stock notices.
    pub stock_channel: String,
    /// CPU family (as named in notices) to shape.
    pub cpu_shapes: CpuShapeMap,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jitter_spread_secs: 5,
            min_wait_secs: 1,
            running_poll_attempts: 30,
            running_poll_interval_secs: 10,
            password_length: 32,
            bus_capacity: 1024,
            grace_secs: 30,
            stock_channel: "stock_notification".to_string(),
            cpu_shapes: CpuShapeMap::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// [`ConfigError::Parse`] on malformed TOML, [`ConfigError::Invalid`] on
    /// out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    /// [`ConfigError::Read`] when the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.password_length < MIN_PASSWORD_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "password_length must be at least {MIN_PASSWORD_LENGTH}"
            )));
        }
        if self.stock_channel.trim().is_empty() {
            return Err(ConfigError::Invalid("stock_channel must not be empty".into()));
        }
        if self.cpu_shapes.is_empty() {
            return Err(ConfigError::Invalid("cpu_shapes must not be empty".into()));
        }
        Ok(())
    }

    /// Retry policy built from the jitter settings.
    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(WaitJitter {
            spread_secs: self.jitter_spread_secs,
            floor_secs: self.min_wait_secs,
        })
    }

    /// Running-state poll bounds (at least one read).
    #[inline]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            attempts: self.running_poll_attempts.max(1),
            interval: Duration::from_secs(self.running_poll_interval_secs),
        }
    }

    #[inline]
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.retry_policy().jitter.bounds(30), (25, 35));
        assert_eq!(cfg.poll_policy(), PollPolicy::default());
        assert_eq!(cfg.grace(), Duration::from_secs(30));
        assert_eq!(cfg.stock_channel, "stock_notification");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            jitter_spread_secs = 10
            grace_secs = 5

            [cpu_shapes]
            ARM = "VM.Standard.A1.Flex"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.jitter_spread_secs, 10);
        assert_eq!(cfg.grace(), Duration::from_secs(5));
        assert_eq!(cfg.password_length, 32);
        assert!(cfg.cpu_shapes.matches("VM.Standard.A1.Flex", Some("arm")));
        assert!(!cfg.cpu_shapes.matches("VM.Standard.E2.1.Micro", Some("AMD")));
    }

    #[test]
    fn sentinels_are_clamped() {
        let cfg = EngineConfig {
            running_poll_attempts: 0,
            bus_capacity: 0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.poll_policy().attempts, 1);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = EngineConfig::from_toml_str("password_length = 4").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("stock_channel = \"  \"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("grace_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = EngineConfig::from_path("/nonexistent/capgrab.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
