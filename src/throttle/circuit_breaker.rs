// src/throttle/circuit_breaker.rs
// Closed/Open/HalfOpen failure-isolation state machine

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Operations flow normally.
    Closed,
    /// Operations are refused until the recovery timeout elapses.
    Open,
    /// A bounded number of probe operations test recovery.
    HalfOpen,
}

/// Circuit breaker thresholds and recovery timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before probing recovery.
    pub timeout: Duration,
    /// Successes in half-open required to close the circuit.
    pub success_threshold: u32,
    /// Admission cap while half-open.
    pub max_requests_in_half_open: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 3,
            max_requests_in_half_open: 5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold {
                field: "failure_threshold".to_string(),
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ZeroThreshold {
                field: "success_threshold".to_string(),
            });
        }
        if self.max_requests_in_half_open == 0 {
            return Err(ConfigError::ZeroThreshold {
                field: "max_requests_in_half_open".to_string(),
            });
        }
        Ok(())
    }
}

/// Error wrapper distinguishing a refused call from a failed operation.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open (or the half-open admission cap is reached);
    /// the operation never ran.
    CircuitOpen,
    /// The wrapped operation ran and failed.
    Operation(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "circuit breaker is open"),
            CircuitBreakerError::Operation(e) => write!(f, "operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitBreakerError::CircuitOpen => None,
            CircuitBreakerError::Operation(e) => Some(e),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    requests_in_half_open: u32,
    last_failure_at: Option<Instant>,
}

/// Serializable counters for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub requests_in_half_open: u32,
}

/// Failure-isolating state machine refusing calls after repeated faults.
///
/// All transition state lives behind one lock; admission decisions and
/// result bookkeeping each take it briefly, and the wrapped operation
/// runs with the lock released.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                requests_in_half_open: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().expect("breaker state poisoned").state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state.lock().expect("breaker state poisoned");
        CircuitBreakerMetrics {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            requests_in_half_open: state.requests_in_half_open,
        }
    }

    /// Run `op` under the breaker's admission rules.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure();
                Err(CircuitBreakerError::Operation(error))
            }
        }
    }

    /// Admission gate. Transitions Open -> HalfOpen once the recovery
    /// timeout has elapsed; admitted half-open requests count against
    /// the cap.
    fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut state = self.state.lock().expect("breaker state poisoned");

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed_timeout = state
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);

                if !elapsed_timeout {
                    return Err(CircuitBreakerError::CircuitOpen);
                }

                info!("circuit breaker probing recovery (half-open)");
                state.state = CircuitState::HalfOpen;
                state.failure_count = 0;
                state.success_count = 0;
                state.requests_in_half_open = 1;
                Ok(())
            }
            CircuitState::HalfOpen => {
                if state.requests_in_half_open >= self.config.max_requests_in_half_open {
                    return Err(CircuitBreakerError::CircuitOpen);
                }
                state.requests_in_half_open += 1;
                Ok(())
            }
        }
    }

    fn on_success(&self) {
        let mut state = self.state.lock().expect("breaker state poisoned");

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.requests_in_half_open = 0;
                    info!("circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {
                // A straggler admitted before the trip; nothing to do.
            }
        }
    }

    fn on_failure(&self) {
        let mut state = self.state.lock().expect("breaker state poisoned");
        let now = Instant::now();

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.last_failure_at = Some(now);
                    warn!(
                        failures = state.failure_count,
                        "circuit breaker opened after repeated failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.last_failure_at = Some(now);
                warn!("circuit breaker re-opened: failure during recovery probe");
            }
            CircuitState::Open => {
                state.last_failure_at = Some(now);
            }
        }
    }

    /// Force the circuit closed and clear all counters.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("breaker state poisoned");
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.requests_in_half_open = 0;
        state.last_failure_at = None;
        info!("circuit breaker manually reset");
    }

    /// Force the circuit open as if a failure had just occurred.
    pub fn open(&self) {
        let mut state = self.state.lock().expect("breaker state poisoned");
        state.state = CircuitState::Open;
        state.last_failure_at = Some(Instant::now());
        warn!("circuit breaker manually opened");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            timeout: Duration::from_millis(100),
            success_threshold: 2,
            max_requests_in_half_open: 5,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.execute(|| async { Err::<(), _>("boom") }).await.map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.execute(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_starts_closed_and_stays_closed_on_success() {
        let breaker = CircuitBreaker::new(test_config());
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..10 {
            succeed(&breaker).await.unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_in_closed() {
        let breaker = CircuitBreaker::new(test_config());

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;

        // Never three consecutive failures, so still closed.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_at_failure_threshold() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Fails fast while open, without running the operation.
        let result = breaker
            .execute(|| async {
                assert!(false, "must not run while open");
                Ok::<(), &'static str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_open_to_half_open_to_closed() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Before the timeout: refused.
        assert!(matches!(
            succeed(&breaker).await,
            Err(CircuitBreakerError::CircuitOpen)
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;

        // After the timeout: probe runs in half-open.
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Second consecutive success closes the circuit.
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Back to fail-fast until another timeout elapses.
        assert!(matches!(
            succeed(&breaker).await,
            Err(CircuitBreakerError::CircuitOpen)
        ));
    }

    #[tokio::test]
    async fn test_half_open_admission_cap() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(50),
            success_threshold: 10,
            max_requests_in_half_open: 2,
        };
        let breaker = CircuitBreaker::new(config);

        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Two admissions allowed (successes below the close threshold).
        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Third refused by the cap.
        assert!(matches!(
            succeed(&breaker).await,
            Err(CircuitBreakerError::CircuitOpen)
        ));
    }

    #[tokio::test]
    async fn test_manual_reset_and_open() {
        let breaker = CircuitBreaker::new(test_config());

        breaker.open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            succeed(&breaker).await,
            Err(CircuitBreakerError::CircuitOpen)
        ));

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        succeed(&breaker).await.unwrap();

        let metrics = breaker.metrics();
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_operation_error_is_preserved() {
        let breaker = CircuitBreaker::new(test_config());
        let result: Result<(), _> = breaker.execute(|| async { Err("specific error") }).await;
        match result {
            Err(CircuitBreakerError::Operation(e)) => assert_eq!(e, "specific error"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let bad = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = CircuitBreakerConfig {
            max_requests_in_half_open: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
