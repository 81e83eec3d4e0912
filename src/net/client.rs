// src/net/client.rs
// Policy-gated, semaphore-bounded, breaker-protected request execution

use crate::config::KairoConfig;
use crate::errors::{KairoError, NetworkErrorKind, TransportError};
use crate::health::HealthSnapshot;
use crate::net::metrics::{MetricsSnapshot, NetworkMetrics};
use crate::net::request::{NetworkRequest, NetworkResponse};
use crate::net::transport::{HttpRequest, HttpResponse, Transport};
use crate::policy::{HealthLevel, OperationKind, Policy, PolicyEngine};
use crate::throttle::{AdaptiveSemaphore, CircuitBreaker, CircuitBreakerError, CircuitState, SemaphoreStatus};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Classification of a single transport attempt, before retry handling.
enum AttemptError {
    /// External cancellation; surfaces immediately.
    Cancelled,
    /// Fault that feeds the retry loop when retries remain.
    Retryable(NetworkErrorKind),
}

/// Network client composing admission control, the concurrency gate,
/// and the circuit breaker around an abstract transport.
///
/// Policy pushes resize the semaphore before the stored policy is
/// swapped, so no admission decision can observe the new policy with
/// the old ceiling.
pub struct NetworkClient {
    transport: Arc<dyn Transport>,
    engine: Arc<PolicyEngine>,
    semaphore: Arc<AdaptiveSemaphore>,
    breaker: Arc<CircuitBreaker>,
    policy: RwLock<Policy>,
    latest_snapshot: RwLock<Option<HealthSnapshot>>,
    metrics: NetworkMetrics,
    cancel: CancellationToken,
    backoff_unit: Duration,
}

impl NetworkClient {
    pub fn new(
        config: &KairoConfig,
        engine: Arc<PolicyEngine>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            transport,
            engine,
            semaphore: Arc::new(AdaptiveSemaphore::new(config.network_max_concurrent)),
            breaker: Arc::new(CircuitBreaker::new(config.breaker.clone())),
            policy: RwLock::new(Policy::for_level(
                HealthLevel::High,
                config.network_max_concurrent,
            )),
            latest_snapshot: RwLock::new(None),
            metrics: NetworkMetrics::new(),
            cancel: CancellationToken::new(),
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Override the exponential backoff unit (default one second).
    /// Sleep before retry `n` is `unit * 2^(n-1)`.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Apply a new policy: resize the gate first, then publish the
    /// policy for admission checks.
    pub fn update_policy(&self, policy: Policy) {
        self.semaphore.resize(policy.max_network_concurrent);
        *self.policy.write().expect("client policy poisoned") = policy;
    }

    /// Record the snapshot admission checks evaluate against.
    pub fn update_health(&self, snapshot: HealthSnapshot) {
        *self
            .latest_snapshot
            .write()
            .expect("client snapshot poisoned") = Some(snapshot);
    }

    pub fn policy(&self) -> Policy {
        self.policy.read().expect("client policy poisoned").clone()
    }

    pub fn semaphore_status(&self) -> SemaphoreStatus {
        self.semaphore.status()
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Cancel pending waiters and refuse all future requests. Called by
    /// the façade during teardown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.semaphore.deactivate();
    }

    /// Execute a request under the current policy.
    ///
    /// Denied admissions fail with `Cancelled` (critical-priority
    /// requests are never denied by policy). The permit is held across
    /// the breaker, transport, and retry sleeps, and released on every
    /// path.
    pub async fn request(&self, request: NetworkRequest) -> Result<NetworkResponse, KairoError> {
        let started = Instant::now();
        let priority = request.priority;

        match self.gated_request(&request).await {
            Ok(response) => {
                self.metrics
                    .record_success(priority, response.duration, response.retry_count);
                Ok(response)
            }
            Err((error, retries)) => {
                warn!(
                    id = %request.id,
                    code = error.code(),
                    retries,
                    "request failed"
                );
                self.metrics
                    .record_failure(priority, started.elapsed(), retries);
                Err(error)
            }
        }
    }

    /// Failures carry the number of retries performed before the error,
    /// so the metrics match what actually went over the wire.
    async fn gated_request(
        &self,
        request: &NetworkRequest,
    ) -> Result<NetworkResponse, (KairoError, u32)> {
        let admission_snapshot = self
            .latest_snapshot
            .read()
            .expect("client snapshot poisoned")
            .clone();
        if let Some(snapshot) = admission_snapshot {
            let policy = self.policy();
            let op = OperationKind::NetworkRequest {
                priority: request.priority,
            };
            if !self.engine.should_allow(&op, &snapshot, &policy) {
                debug!(id = %request.id, priority = %request.priority, "request denied by policy");
                return Err((KairoError::Cancelled, 0));
            }
        }

        let permit = self
            .semaphore
            .acquire_with_token(&self.cancel)
            .await
            .map_err(|error| (error, 0))?;
        let result = self.execute_with_retry(request).await;
        permit.release();
        result
    }

    async fn execute_with_retry(
        &self,
        request: &NetworkRequest,
    ) -> Result<NetworkResponse, (KairoError, u32)> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let retries_so_far = attempt - 1;

            if self.cancel.is_cancelled() {
                return Err((KairoError::Cancelled, retries_so_far));
            }

            let outcome = self
                .breaker
                .execute(|| self.attempt_once(request))
                .await;

            match outcome {
                Ok(response) => {
                    // 4xx is terminal: no retry, and the breaker does
                    // not treat a well-formed client error as a fault.
                    if (400..500).contains(&response.status) {
                        return Err((
                            KairoError::Network(NetworkErrorKind::ClientError(response.status)),
                            retries_so_far,
                        ));
                    }
                    return Ok(NetworkResponse {
                        body: response.body,
                        status: response.status,
                        headers: response.headers,
                        duration: started.elapsed(),
                        retry_count: retries_so_far,
                    });
                }
                Err(CircuitBreakerError::CircuitOpen) => {
                    return Err((KairoError::CircuitOpen, retries_so_far));
                }
                Err(CircuitBreakerError::Operation(AttemptError::Cancelled)) => {
                    return Err((KairoError::Cancelled, retries_so_far));
                }
                Err(CircuitBreakerError::Operation(AttemptError::Retryable(kind))) => {
                    let retries_left = request.retry_enabled && attempt <= request.max_retries;
                    if !retries_left {
                        return Err((KairoError::Network(kind), retries_so_far));
                    }

                    let backoff = self.backoff_unit * 2u32.pow(attempt - 1);
                    warn!(
                        id = %request.id,
                        attempt,
                        max_retries = request.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        code = kind.code(),
                        "attempt failed; retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.cancel.cancelled() => {
                            return Err((KairoError::Cancelled, retries_so_far));
                        }
                    }
                }
            }
        }
    }

    /// One transport exchange. 5xx and transport faults are reported as
    /// attempt errors so the breaker counts them; everything below 500
    /// is a completed exchange.
    async fn attempt_once(&self, request: &NetworkRequest) -> Result<HttpResponse, AttemptError> {
        let http_request = HttpRequest {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        };

        match self.transport.execute(http_request, request.timeout).await {
            Ok(response) => {
                if response.status >= 500 {
                    Err(AttemptError::Retryable(NetworkErrorKind::ServerError(
                        response.status,
                    )))
                } else {
                    Ok(response)
                }
            }
            Err(TransportError::Cancelled) => Err(AttemptError::Cancelled),
            Err(transport_error) => {
                Err(AttemptError::Retryable(transport_error.into()))
            }
        }
    }
}
