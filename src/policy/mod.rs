// src/policy/mod.rs

pub mod engine;
pub mod types;

pub use engine::PolicyEngine;
pub use types::{
    HealthLevel, ImageSize, ImageVariant, OperationKind, Policy, RequestPriority,
};
