//! Session configuration
//!
//! All tunables are explicit: a [`PowerbaseConfig`] is built in code or read
//! from YAML and passed to [`Powerbase::start`](crate::Powerbase::start).
//! Missing YAML fields take their defaults.
//!
//! ```rust
//! use powerbase::PowerbaseConfig;
//!
//! let config = PowerbaseConfig::from_yaml("heartbeat_interval_ms: 150\nslot_count: 4\n").unwrap();
//! assert_eq!(config.heartbeat_interval().as_millis(), 150);
//! assert_eq!(config.slot_count, 4);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::heartbeat::{MAX_INTERVAL, MIN_INTERVAL};
use crate::protocol::ThrottleCurve;
use crate::types::{MAX_MULTIPLIER, SLOT_COUNT, SlotId};
use crate::{PowerbaseError, Result};

/// Minimum gap the powerbase needs between throttle profile blocks.
pub const MIN_PROFILE_BLOCK_SPACING: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerbaseConfig {
    /// Command packet period, 100–200 ms.
    pub heartbeat_interval_ms: u64,
    /// Upper bound on any single transport write.
    pub write_timeout_ms: u64,
    /// Upper bound on power-off and shutdown.
    pub shutdown_timeout_ms: u64,
    /// Gap between throttle profile blocks, at least 50 ms.
    pub profile_block_spacing_ms: u64,
    /// Curve uploaded to every slot before power-on.
    pub throttle_curve: ThrottleCurve,
    /// Number of slots in use, 1–6.
    pub slot_count: u8,
    /// Heartbeat failures in a row before the session cuts power.
    pub max_consecutive_write_failures: u32,
    /// Throttle a ghost drives at until it first reaches the line.
    pub default_approach_throttle: u8,
    /// Depth of the inbound notification queue.
    pub notification_queue_depth: usize,
}

impl Default for PowerbaseConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 150,
            write_timeout_ms: 100,
            shutdown_timeout_ms: 1_000,
            profile_block_spacing_ms: 50,
            throttle_curve: ThrottleCurve::Linear,
            slot_count: SLOT_COUNT as u8,
            max_consecutive_write_failures: 10,
            default_approach_throttle: 20,
            notification_queue_depth: 256,
        }
    }
}

impl PowerbaseConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let interval = self.heartbeat_interval();
        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&interval) {
            return Err(PowerbaseError::configuration(format!(
                "heartbeat_interval_ms must be {}..={}, got {}",
                MIN_INTERVAL.as_millis(),
                MAX_INTERVAL.as_millis(),
                self.heartbeat_interval_ms
            )));
        }
        if self.write_timeout_ms == 0 {
            return Err(PowerbaseError::configuration("write_timeout_ms must be nonzero"));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(PowerbaseError::configuration("shutdown_timeout_ms must be nonzero"));
        }
        if self.profile_block_spacing() < MIN_PROFILE_BLOCK_SPACING {
            return Err(PowerbaseError::configuration(format!(
                "profile_block_spacing_ms must be at least {}, got {}",
                MIN_PROFILE_BLOCK_SPACING.as_millis(),
                self.profile_block_spacing_ms
            )));
        }
        if !(1..=SLOT_COUNT as u8).contains(&self.slot_count) {
            return Err(PowerbaseError::configuration(format!(
                "slot_count must be 1..={}, got {}",
                SLOT_COUNT, self.slot_count
            )));
        }
        if self.max_consecutive_write_failures == 0 {
            return Err(PowerbaseError::configuration(
                "max_consecutive_write_failures must be nonzero",
            ));
        }
        if self.default_approach_throttle > MAX_MULTIPLIER {
            return Err(PowerbaseError::configuration(format!(
                "default_approach_throttle must be 0..={}, got {}",
                MAX_MULTIPLIER, self.default_approach_throttle
            )));
        }
        if self.notification_queue_depth == 0 {
            return Err(PowerbaseError::configuration("notification_queue_depth must be nonzero"));
        }
        self.throttle_curve.validate()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn profile_block_spacing(&self) -> Duration {
        Duration::from_millis(self.profile_block_spacing_ms)
    }

    /// The slots in use.
    pub fn slots(&self) -> impl Iterator<Item = SlotId> {
        SlotId::first(self.slot_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PowerbaseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(150));
        assert_eq!(config.slots().count(), 6);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let config = PowerbaseConfig::from_yaml(
            "slot_count: 2\nthrottle_curve:\n  type: exponential\n  exponent: 2.0\n",
        )
        .unwrap();
        assert_eq!(config.slot_count, 2);
        assert_eq!(config.throttle_curve, ThrottleCurve::Exponential { exponent: 2.0 });
        assert_eq!(config.write_timeout_ms, PowerbaseConfig::default().write_timeout_ms);
        assert_eq!(config.slots().map(SlotId::get).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn rejects_out_of_range_interval() {
        for ms in [50, 99, 201, 1_000] {
            let config = PowerbaseConfig { heartbeat_interval_ms: ms, ..Default::default() };
            assert!(matches!(config.validate(), Err(PowerbaseError::Configuration { .. })), "{ms}");
        }
        for ms in [100, 200] {
            let config = PowerbaseConfig { heartbeat_interval_ms: ms, ..Default::default() };
            config.validate().unwrap();
        }
    }

    #[test]
    fn rejects_tight_profile_spacing() {
        let config = PowerbaseConfig { profile_block_spacing_ms: 20, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_slot_count() {
        for count in [0, 7] {
            let config = PowerbaseConfig { slot_count: count, ..Default::default() };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn rejects_invalid_curve() {
        let config = PowerbaseConfig {
            throttle_curve: ThrottleCurve::Stepped { steps: 1 },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PowerbaseError::InvalidCurve { .. })));
    }

    #[test]
    fn malformed_yaml_is_a_configuration_error() {
        let result = PowerbaseConfig::from_yaml("slot_count: [not, a, number]");
        assert!(matches!(result, Err(PowerbaseError::Configuration { .. })));
    }

    #[test]
    fn yaml_round_trip() {
        let config = PowerbaseConfig { heartbeat_interval_ms: 120, ..Default::default() };
        let yaml = config.to_yaml().unwrap();
        assert_eq!(PowerbaseConfig::from_yaml(&yaml).unwrap(), config);
    }
}
