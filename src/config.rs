// src/config.rs
// Top-level configuration with eager validation

use crate::errors::ConfigError;
use crate::throttle::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the Kairo façade and its subsystems.
///
/// Component-specific knobs (the circuit breaker) nest their own config
/// structs; the flat fields here feed the health monitor and the policy
/// engine directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KairoConfig {
    /// Base concurrency ceiling for the network semaphore. The policy
    /// table scales this down as health degrades; it never goes below 1.
    pub network_max_concurrent: u32,

    /// Battery fraction below which power-hungry operations are denied.
    pub low_battery_threshold: f64,

    /// Quiet window required before a significant health change is
    /// broadcast. Critical flips bypass the window.
    pub debounce_ms: u64,

    /// Period of the monitor's scheduled probe reads.
    pub tick_period_ms: u64,

    /// Circuit breaker thresholds and recovery timeout.
    pub breaker: CircuitBreakerConfig,
}

impl Default for KairoConfig {
    fn default() -> Self {
        Self {
            network_max_concurrent: 6,
            low_battery_threshold: 0.15,
            debounce_ms: 350,
            tick_period_ms: 5000,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl KairoConfig {
    /// Validate the configuration, rejecting values the subsystems
    /// cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network_max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency {
                value: self.network_max_concurrent,
            });
        }

        if !(0.0..=1.0).contains(&self.low_battery_threshold) {
            return Err(ConfigError::FractionOutOfRange {
                field: "low_battery_threshold".to_string(),
                value: self.low_battery_threshold,
            });
        }

        if self.tick_period_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "tick_period_ms".to_string(),
            });
        }

        self.breaker.validate()?;

        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Deadline after which an unresponsive probe read is abandoned and
    /// the previous snapshot reused.
    pub fn probe_deadline(&self) -> Duration {
        self.tick_period() * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KairoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network_max_concurrent, 6);
        assert_eq!(config.low_battery_threshold, 0.15);
        assert_eq!(config.debounce_ms, 350);
        assert_eq!(config.tick_period_ms, 5000);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = KairoConfig {
            network_max_concurrent: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CFG_ZERO_CONCURRENCY");
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = KairoConfig {
            low_battery_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = KairoConfig {
            low_battery_threshold: -0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_tick_period_rejected() {
        let config = KairoConfig {
            tick_period_ms: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CFG_ZERO_DURATION");
    }

    #[test]
    fn test_probe_deadline_is_twice_tick() {
        let config = KairoConfig {
            tick_period_ms: 100,
            ..Default::default()
        };
        assert_eq!(config.probe_deadline(), Duration::from_millis(200));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = KairoConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: KairoConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.network_max_concurrent, config.network_max_concurrent);
        assert_eq!(parsed.debounce_ms, config.debounce_ms);
    }
}
