//! Relay configuration.
//!
//! All durations are in seconds, matching the event timestamps.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default port: 0x77 'w', 0x78 'x'.
pub const DEFAULT_PORT: u16 = 0x7778;

/// How the novelty filter treats repeated sightings of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// Retain every event. The repeat interval only refreshes last-seen.
    #[default]
    RetainAlways,
    /// Retain the first event, then drop until the interval has elapsed.
    RetainAfterInterval,
    /// Only retain an event if the identity was already seen within the
    /// interval. One-off sightings are never shared.
    ConfirmRepeat,
}

impl RepeatPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatPolicy::RetainAlways => "retain_always",
            RepeatPolicy::RetainAfterInterval => "retain_after_interval",
            RepeatPolicy::ConfirmRepeat => "confirm_repeat",
        }
    }
}

/// Core relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Horizon for compaction, and max age to show *anything* for an identity.
    pub max_age_secs: f64,

    /// All samples younger than this are rendered, not just the latest.
    pub backlog_secs: f64,

    /// Minimum repeat interval used by the novelty filter.
    pub min_repeat_secs: f64,

    /// Novelty filter policy.
    pub repeat_policy: RepeatPolicy,

    /// Append millisecond timestamps to rendered samples.
    pub export_timestamps: bool,

    /// Run maintenance every this many ingested lines.
    pub clean_interval: u64,

    /// How far the log may run ahead of the wall clock before it is reset.
    pub clock_jump_tolerance_secs: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 300.0,
            backlog_secs: 60.0,
            min_repeat_secs: 3600.0,
            repeat_policy: RepeatPolicy::RetainAlways,
            export_timestamps: true,
            clean_interval: 1000,
            clock_jump_tolerance_secs: 60.0,
        }
    }
}

impl RelayConfig {
    /// Create a configuration with a custom max age
    pub fn with_max_age(max_age_secs: f64) -> Self {
        Self {
            max_age_secs,
            ..Default::default()
        }
    }

    /// Create a configuration with a specific repeat policy
    pub fn with_policy(repeat_policy: RepeatPolicy) -> Self {
        Self {
            repeat_policy,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every knob is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("max_age_secs", self.max_age_secs),
            ("backlog_secs", self.backlog_secs),
            ("min_repeat_secs", self.min_repeat_secs),
            ("clock_jump_tolerance_secs", self.clock_jump_tolerance_secs),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidDuration { name, value });
            }
        }
        if self.backlog_secs > self.max_age_secs {
            return Err(ConfigError::BacklogExceedsMaxAge {
                backlog: self.backlog_secs,
                max_age: self.max_age_secs,
            });
        }
        if self.clean_interval == 0 {
            return Err(ConfigError::ZeroCleanInterval);
        }
        Ok(())
    }
}
