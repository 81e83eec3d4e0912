// src/health/snapshot.rs
// Immutable device-health snapshot with weighted scoring and change detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Battery fraction below which the snapshot is considered critical.
const CRITICAL_BATTERY_LEVEL: f64 = 0.05;

/// Battery delta that counts as a significant change between snapshots.
const SIGNIFICANT_BATTERY_DELTA: f64 = 0.05;

/// Health-score delta that counts as a significant change.
const SIGNIFICANT_SCORE_DELTA: f64 = 0.1;

/// Thermal pressure reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

impl ThermalState {
    /// Weighting factor used by the health score.
    fn factor(self) -> f64 {
        match self {
            ThermalState::Nominal => 1.0,
            ThermalState::Fair => 0.8,
            ThermalState::Serious => 0.5,
            ThermalState::Critical => 0.2,
        }
    }
}

/// Network path reachability reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetReachability {
    /// The path is usable right now.
    Satisfied,
    /// The path could become usable (e.g. after user interaction).
    Satisfiable,
    /// A connection must be established first.
    RequiresConnection,
}

impl NetReachability {
    fn reach_score(self) -> f64 {
        match self {
            NetReachability::Satisfied => 1.0,
            NetReachability::Satisfiable => 0.5,
            NetReachability::RequiresConnection => 0.0,
        }
    }
}

fn instant_now() -> Instant {
    Instant::now()
}

/// Immutable point-in-time device health record.
///
/// `battery_level` is stored exactly as received for diagnostics; the
/// scoring path clamps it into `[0, 1]`. `timestamp` is monotonic and
/// drives all ordering guarantees; `captured_at` is wall-clock and only
/// feeds serialized diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub battery_level: f64,
    pub low_power_mode: bool,
    pub thermal: ThermalState,
    pub net_reach: NetReachability,
    pub net_constrained: bool,
    pub net_expensive: bool,

    #[serde(skip, default = "instant_now")]
    pub timestamp: Instant,
    pub captured_at: DateTime<Utc>,

    /// Disk capacity diagnostics. Observed and reported; never scored.
    pub disk_available_bytes: Option<u64>,
    pub disk_total_bytes: Option<u64>,
}

impl HealthSnapshot {
    pub fn new(
        battery_level: f64,
        low_power_mode: bool,
        thermal: ThermalState,
        net_reach: NetReachability,
        net_constrained: bool,
        net_expensive: bool,
    ) -> Self {
        Self {
            battery_level,
            low_power_mode,
            thermal,
            net_reach,
            net_constrained,
            net_expensive,
            timestamp: Instant::now(),
            captured_at: Utc::now(),
            disk_available_bytes: None,
            disk_total_bytes: None,
        }
    }

    /// Attach disk capacity diagnostics.
    pub fn with_disk(mut self, available_bytes: u64, total_bytes: u64) -> Self {
        self.disk_available_bytes = Some(available_bytes);
        self.disk_total_bytes = Some(total_bytes);
        self
    }

    /// Composite health score in `[0, 1]`.
    ///
    /// Weighted multiplicative form: each term is pinned near 1.0 so a
    /// single degraded signal dents the score proportionally to its
    /// weight instead of zeroing it.
    pub fn health_score(&self) -> f64 {
        let battery_term = self.battery_level.clamp(0.0, 1.0) * 0.4 + 0.6;
        let thermal_term = self.thermal.factor() * 0.3 + 0.7;
        let lpm_term = if self.low_power_mode { 0.85 } else { 1.0 };

        let constrained_factor = if self.net_constrained { 0.7 } else { 1.0 };
        let net_term = self.net_reach.reach_score() * constrained_factor * 0.1 + 0.9;

        let expense_term = if self.net_expensive { 0.95 } else { 1.0 };

        (battery_term * thermal_term * lpm_term * net_term * expense_term).clamp(0.0, 1.0)
    }

    /// Diagnostic alias for `health_score`, kept for reporting parity
    /// with platform tooling that exposes the raw composite.
    pub fn overall_health_score(&self) -> f64 {
        self.health_score()
    }

    /// Whether the device is in a state that forces the critical policy
    /// path regardless of score.
    pub fn is_critical(&self) -> bool {
        self.battery_level < CRITICAL_BATTERY_LEVEL
            || self.thermal == ThermalState::Critical
            || self.net_reach == NetReachability::RequiresConnection
    }

    /// Significant-change predicate gating broadcast.
    ///
    /// A snapshot is worth publishing only if it moved along at least
    /// one axis: battery by more than 5 points, thermal tier, low-power
    /// flag, any network field, or the composite score by more than 0.1.
    pub fn differs_significantly_from(&self, previous: &HealthSnapshot) -> bool {
        if (self.battery_level - previous.battery_level).abs() > SIGNIFICANT_BATTERY_DELTA {
            return true;
        }
        if self.thermal != previous.thermal {
            return true;
        }
        if self.low_power_mode != previous.low_power_mode {
            return true;
        }
        if self.net_reach != previous.net_reach
            || self.net_constrained != previous.net_constrained
            || self.net_expensive != previous.net_expensive
        {
            return true;
        }
        (self.health_score() - previous.health_score()).abs() > SIGNIFICANT_SCORE_DELTA
    }

    /// Disk usage fraction if both diagnostics are present.
    pub fn disk_used_fraction(&self) -> Option<f64> {
        match (self.disk_available_bytes, self.disk_total_bytes) {
            (Some(available), Some(total)) if total > 0 => {
                Some(1.0 - available as f64 / total as f64)
            }
            _ => None,
        }
    }
}
