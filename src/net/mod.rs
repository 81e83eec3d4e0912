// src/net/mod.rs

pub mod client;
pub mod metrics;
pub mod request;
pub mod transport;

pub use client::NetworkClient;
pub use metrics::{MetricsSnapshot, NetworkMetrics, PrioritySnapshot};
pub use request::{HttpMethod, NetworkRequest, NetworkResponse};
pub use transport::{HttpRequest, HttpResponse, MockTransport, ReqwestTransport, Transport};
