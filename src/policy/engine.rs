// src/policy/engine.rs
// Snapshot -> policy reduction with hysteresis, and per-operation admission

use crate::config::KairoConfig;
use crate::health::{HealthSnapshot, NetReachability, ThermalState};
use crate::policy::types::{
    HealthLevel, ImageSize, OperationKind, Policy, RequestPriority,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info};

/// Number of recent scores retained for trend observability.
const TREND_HISTORY_LEN: usize = 10;

/// Download size above which constrained networks refuse the transfer.
const CONSTRAINED_DOWNLOAD_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug)]
struct EngineState {
    last_level: HealthLevel,
    score_history: VecDeque<f64>,
}

/// Deterministic reducer from health snapshots to policies.
///
/// `evaluate` is pure apart from the hysteresis level and the bounded
/// trend history, both guarded by one lock that is never held across an
/// await point.
pub struct PolicyEngine {
    config: KairoConfig,
    state: Mutex<EngineState>,
}

impl PolicyEngine {
    pub fn new(config: KairoConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState {
                last_level: HealthLevel::High,
                score_history: VecDeque::with_capacity(TREND_HISTORY_LEN),
            }),
        }
    }

    /// Reduce a snapshot to a policy.
    ///
    /// The level moves through a hysteresis band: entry and exit
    /// thresholds are separated so scores hovering near a boundary do
    /// not flap the policy. A critical snapshot short-circuits to
    /// `Critical` regardless of score.
    pub fn evaluate(&self, snapshot: &HealthSnapshot) -> Policy {
        let score = snapshot.health_score();

        let mut state = self.state.lock().expect("policy engine state poisoned");

        state.score_history.push_back(score);
        while state.score_history.len() > TREND_HISTORY_LEN {
            state.score_history.pop_front();
        }

        let next_level = if snapshot.is_critical() {
            HealthLevel::Critical
        } else {
            Self::transition(state.last_level, score)
        };

        if next_level != state.last_level {
            info!(
                from = %state.last_level,
                to = %next_level,
                score,
                "health level transition"
            );
        } else {
            debug!(level = %next_level, score, "health level held");
        }
        state.last_level = next_level;

        Policy::for_level(next_level, self.config.network_max_concurrent)
    }

    fn transition(previous: HealthLevel, score: f64) -> HealthLevel {
        match previous {
            HealthLevel::High => {
                if score < 0.7 {
                    HealthLevel::Medium
                } else {
                    HealthLevel::High
                }
            }
            HealthLevel::Medium => {
                if score < 0.4 {
                    HealthLevel::Low
                } else if score > 0.8 {
                    HealthLevel::High
                } else {
                    HealthLevel::Medium
                }
            }
            HealthLevel::Low => {
                if score < 0.2 {
                    HealthLevel::Critical
                } else if score > 0.6 {
                    HealthLevel::Medium
                } else {
                    HealthLevel::Low
                }
            }
            HealthLevel::Critical => {
                if score > 0.4 {
                    HealthLevel::Low
                } else {
                    HealthLevel::Critical
                }
            }
        }
    }

    /// Last published health level.
    pub fn last_level(&self) -> HealthLevel {
        self.state
            .lock()
            .expect("policy engine state poisoned")
            .last_level
    }

    /// Recent health scores, oldest first.
    pub fn trend(&self) -> Vec<f64> {
        self.state
            .lock()
            .expect("policy engine state poisoned")
            .score_history
            .iter()
            .copied()
            .collect()
    }

    /// Admission predicate: ordered rules, first match wins. Never
    /// errors; a denial is just `false`.
    pub fn should_allow(
        &self,
        op: &OperationKind,
        snapshot: &HealthSnapshot,
        policy: &Policy,
    ) -> bool {
        // Rule 1: critical-priority network requests always pass.
        if matches!(
            op,
            OperationKind::NetworkRequest {
                priority: RequestPriority::Critical
            }
        ) {
            return true;
        }

        // Rule 2: a critical device admits nothing else.
        if snapshot.is_critical() {
            return false;
        }

        // Rule 3: thermal gate.
        match snapshot.thermal {
            ThermalState::Critical => return false,
            ThermalState::Serious
                if matches!(
                    op,
                    OperationKind::MlInference | OperationKind::VideoProcessing
                ) =>
            {
                return false;
            }
            _ => {}
        }

        // Rule 4: battery gate for power-hungry operations.
        if snapshot.battery_level < self.config.low_battery_threshold
            && matches!(
                op,
                OperationKind::MlInference
                    | OperationKind::VideoProcessing
                    | OperationKind::FileDownload { .. }
            )
        {
            return false;
        }

        // Rule 5: network gate.
        if snapshot.net_reach != NetReachability::Satisfied
            && matches!(
                op,
                OperationKind::NetworkRequest { .. } | OperationKind::FileDownload { .. }
            )
        {
            return false;
        }
        if snapshot.net_constrained {
            if let OperationKind::FileDownload { bytes } = op {
                if *bytes >= CONSTRAINED_DOWNLOAD_LIMIT_BYTES {
                    return false;
                }
            }
            if matches!(
                op,
                OperationKind::ImageProcessing {
                    size: ImageSize::Large
                }
            ) {
                return false;
            }
        }

        // Rule 6: policy gate.
        if matches!(op, OperationKind::MlInference) && !policy.allow_background_ml {
            return false;
        }

        true
    }
}
