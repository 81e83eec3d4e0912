// src/policy/types.rs
// Policy values and the enumerated operations gated by them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse health bucket used for policy selection with hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthLevel {
    Critical,
    Low,
    Medium,
    High,
}

impl HealthLevel {
    pub fn is_degraded(self) -> bool {
        matches!(self, HealthLevel::Low | HealthLevel::Critical)
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthLevel::High => write!(f, "high"),
            HealthLevel::Medium => write!(f, "medium"),
            HealthLevel::Low => write!(f, "low"),
            HealthLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Image quality tier recommended under the current policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageVariant {
    Original,
    Large,
    Medium,
    Small,
}

/// Requested image-processing payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    Small,
    Medium,
    Large,
}

/// Priority attached to a network request. `Critical` bypasses every
/// admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RequestPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestPriority::Low => write!(f, "low"),
            RequestPriority::Normal => write!(f, "normal"),
            RequestPriority::High => write!(f, "high"),
            RequestPriority::Critical => write!(f, "critical"),
        }
    }
}

/// Enumerated operation kinds callers ask permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationKind {
    NetworkRequest { priority: RequestPriority },
    ImageProcessing { size: ImageSize },
    MlInference,
    BackgroundTask,
    FileDownload { bytes: u64 },
    VideoProcessing,
}

impl OperationKind {
    /// Short name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::NetworkRequest { .. } => "network_request",
            OperationKind::ImageProcessing { .. } => "image_processing",
            OperationKind::MlInference => "ml_inference",
            OperationKind::BackgroundTask => "background_task",
            OperationKind::FileDownload { .. } => "file_download",
            OperationKind::VideoProcessing => "video_processing",
        }
    }
}

/// Derived throttling directive applied to callers. Immutable value;
/// recomputed from each published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub max_network_concurrent: u32,
    pub allow_background_ml: bool,
    pub image_variant: ImageVariant,
    pub prefer_cache_when_unhealthy: bool,
    pub health_level: HealthLevel,
}

impl Policy {
    /// Map a health level onto a policy, scaling concurrency from the
    /// configured base ceiling. The result never drops below one slot.
    pub fn for_level(level: HealthLevel, base_concurrency: u32) -> Self {
        match level {
            HealthLevel::High => Self {
                max_network_concurrent: base_concurrency.max(1),
                allow_background_ml: true,
                image_variant: ImageVariant::Original,
                prefer_cache_when_unhealthy: false,
                health_level: level,
            },
            HealthLevel::Medium => Self {
                max_network_concurrent: (base_concurrency / 2).max(2),
                allow_background_ml: true,
                image_variant: ImageVariant::Large,
                prefer_cache_when_unhealthy: false,
                health_level: level,
            },
            HealthLevel::Low => Self {
                max_network_concurrent: (base_concurrency / 4).max(1),
                allow_background_ml: false,
                image_variant: ImageVariant::Medium,
                prefer_cache_when_unhealthy: true,
                health_level: level,
            },
            HealthLevel::Critical => Self {
                max_network_concurrent: 1,
                allow_background_ml: false,
                image_variant: ImageVariant::Small,
                prefer_cache_when_unhealthy: true,
                health_level: level,
            },
        }
    }
}
