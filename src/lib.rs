// src/lib.rs
// Adaptive performance-throttling core: observe device health, derive a
// policy, gate operations against it.

pub mod config;
pub mod errors;
pub mod facade;
pub mod health;
pub mod logging;
pub mod net;
pub mod policy;
pub mod throttle;

pub use config::KairoConfig;
pub use errors::{ConfigError, KairoError, NetworkErrorKind, ProbeError, TransportError};
pub use facade::{Kairo, PolicyStream};
pub use health::{
    DeviceProbe, HealthMonitor, HealthSnapshot, HealthStream, MockProbe, MonitorMetrics,
    NetReachability, ThermalState,
};
pub use net::{
    HttpMethod, MetricsSnapshot, MockTransport, NetworkClient, NetworkRequest, NetworkResponse,
    ReqwestTransport, Transport,
};
pub use policy::{
    HealthLevel, ImageSize, ImageVariant, OperationKind, Policy, PolicyEngine, RequestPriority,
};
pub use throttle::{
    AdaptiveSemaphore, CircuitBreaker, CircuitBreakerConfig, CircuitState, SemaphoreStatus,
};
