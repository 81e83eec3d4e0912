// src/throttle/mod.rs

pub mod circuit_breaker;
pub mod semaphore;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics, CircuitState,
};
pub use semaphore::{AdaptiveSemaphore, SemaphorePermit, SemaphoreStatus};
