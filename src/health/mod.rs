// src/health/mod.rs

pub mod monitor;
pub mod probe;
pub mod snapshot;

pub use monitor::{HealthMonitor, HealthStream, MonitorMetrics};
pub use probe::{ChangeCallback, DeviceProbe, MockProbe};
pub use snapshot::{HealthSnapshot, NetReachability, ThermalState};
