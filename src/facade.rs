// src/facade.rs
// Lifecycle and wiring: probe -> monitor -> policy engine -> network client

use crate::config::KairoConfig;
use crate::errors::KairoError;
use crate::health::{DeviceProbe, HealthMonitor, HealthSnapshot, HealthStream};
use crate::net::{NetworkClient, ReqwestTransport, Transport};
use crate::policy::{HealthLevel, ImageVariant, OperationKind, Policy, PolicyEngine};
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Multi-consumer subscription handle for derived policies. New
/// subscribers receive the current policy first.
pub struct PolicyStream {
    rx: mpsc::UnboundedReceiver<Policy>,
}

impl PolicyStream {
    pub async fn recv(&mut self) -> Option<Policy> {
        self.rx.recv().await
    }
}

impl Stream for PolicyStream {
    type Item = Policy;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The façade owning every subsystem: health monitor, policy engine,
/// and the throttled network client.
///
/// `start` wires the snapshot stream into the policy engine and pushes
/// each derived policy to the client before broadcasting it, so the
/// semaphore is resized before any admission decision can observe the
/// new policy. `stop` tears the pipeline down in reverse order; a
/// stopped façade stays stopped, and a new observation cycle needs a
/// new façade.
pub struct Kairo {
    config: KairoConfig,
    monitor: Arc<HealthMonitor>,
    engine: Arc<PolicyEngine>,
    client: Arc<NetworkClient>,
    current_policy: Arc<RwLock<Policy>>,
    policy_subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Policy>>>>,
    running: AtomicBool,
    stopped: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Kairo {
    /// Build the façade with the production HTTP transport.
    pub fn new(config: KairoConfig, probe: Arc<dyn DeviceProbe>) -> Result<Self, KairoError> {
        let transport = Arc::new(
            ReqwestTransport::new().map_err(|e| {
                KairoError::Network(crate::errors::NetworkErrorKind::RequestFailed {
                    reason: e.to_string(),
                })
            })?,
        );
        Self::with_transport(config, probe, transport)
    }

    /// Build the façade with an injected transport (tests, embedders).
    pub fn with_transport(
        config: KairoConfig,
        probe: Arc<dyn DeviceProbe>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, KairoError> {
        config.validate()?;

        let engine = Arc::new(PolicyEngine::new(config.clone()));
        let monitor = Arc::new(HealthMonitor::new(probe, config.clone()));
        let client = Arc::new(NetworkClient::new(&config, engine.clone(), transport));
        let initial_policy =
            Policy::for_level(HealthLevel::High, config.network_max_concurrent);

        Ok(Self {
            config,
            monitor,
            engine,
            client,
            current_policy: Arc::new(RwLock::new(initial_policy)),
            policy_subscribers: Arc::new(Mutex::new(Vec::new())),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: Mutex::new(None),
            pump: Mutex::new(None),
        })
    }

    /// Start the pipeline. Idempotent; a no-op after `stop`.
    pub async fn start(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("start called on a stopped façade; ignoring");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.monitor.start().await;

        let token = CancellationToken::new();
        *self.cancel.lock().expect("facade cancel poisoned") = Some(token.clone());

        // The stream delivers the current snapshot first, so the pump
        // derives the initial policy without a separate evaluation.
        let mut stream = self.monitor.stream();
        let engine = self.engine.clone();
        let client = self.client.clone();
        let current_policy = self.current_policy.clone();
        let subscribers = self.policy_subscribers.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    snapshot = stream.recv() => {
                        let Some(snapshot) = snapshot else { break };
                        apply_snapshot(&engine, &client, &current_policy, &subscribers, snapshot);
                    }
                }
            }
        });
        *self.pump.lock().expect("facade pump poisoned") = Some(handle);

        info!(
            max_concurrent = self.config.network_max_concurrent,
            "kairo started"
        );
    }

    /// Stop the pipeline in reverse order: policy pump, monitor, then
    /// the client's pending waiters. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stopped.store(true, Ordering::SeqCst);

        if let Some(token) = self.cancel.lock().expect("facade cancel poisoned").take() {
            token.cancel();
        }
        let pump = self.pump.lock().expect("facade pump poisoned").take();
        if let Some(handle) = pump {
            let _ = handle.await;
        }

        self.monitor.stop().await;
        self.client.shutdown();

        // Drain the policy channel: every subscriber sees end-of-stream.
        self.policy_subscribers
            .lock()
            .expect("facade subscribers poisoned")
            .clear();

        info!("kairo stopped");
    }

    pub fn current_health(&self) -> HealthSnapshot {
        self.monitor.current()
    }

    pub fn current_policy(&self) -> Policy {
        self.current_policy
            .read()
            .expect("facade policy poisoned")
            .clone()
    }

    /// Subscribe to health snapshots.
    pub fn health_stream(&self) -> HealthStream {
        self.monitor.stream()
    }

    /// Subscribe to derived policies.
    pub fn policy_stream(&self) -> PolicyStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.current_policy());
        self.policy_subscribers
            .lock()
            .expect("facade subscribers poisoned")
            .push(tx);
        PolicyStream { rx }
    }

    /// Ask whether an operation may run under the latest snapshot and
    /// policy. Never errors.
    pub fn should_allow(&self, op: OperationKind) -> bool {
        let snapshot = self.monitor.current();
        let policy = self.current_policy();
        self.engine.should_allow(&op, &snapshot, &policy)
    }

    pub fn recommended_image_quality(&self) -> ImageVariant {
        self.current_policy().image_variant
    }

    pub fn max_concurrent_requests(&self) -> u32 {
        self.current_policy().max_network_concurrent
    }

    pub fn allow_background_ml(&self) -> bool {
        self.current_policy().allow_background_ml
    }

    /// Recent health scores, oldest first.
    pub fn health_trend(&self) -> Vec<f64> {
        self.engine.trend()
    }

    /// The throttled network client wired to this façade.
    pub fn network_client(&self) -> Arc<NetworkClient> {
        self.client.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// One snapshot in, exactly one policy out.
fn apply_snapshot(
    engine: &PolicyEngine,
    client: &NetworkClient,
    current_policy: &RwLock<Policy>,
    subscribers: &Mutex<Vec<mpsc::UnboundedSender<Policy>>>,
    snapshot: HealthSnapshot,
) {
    let policy = engine.evaluate(&snapshot);

    client.update_health(snapshot);
    client.update_policy(policy.clone());
    *current_policy.write().expect("facade policy poisoned") = policy.clone();

    let mut subscribers = subscribers.lock().expect("facade subscribers poisoned");
    subscribers.retain(|tx| tx.send(policy.clone()).is_ok());

    debug!(
        level = %policy.health_level,
        max_concurrent = policy.max_network_concurrent,
        subscribers = subscribers.len(),
        "policy applied"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{MockProbe, NetReachability, ThermalState};
    use crate::net::MockTransport;
    use serial_test::serial;
    use std::time::Duration;

    fn snapshot(battery: f64) -> HealthSnapshot {
        HealthSnapshot::new(
            battery,
            false,
            ThermalState::Nominal,
            NetReachability::Satisfied,
            false,
            false,
        )
    }

    fn facade_with(probe: Arc<MockProbe>) -> Kairo {
        let config = KairoConfig {
            debounce_ms: 50,
            ..Default::default()
        };
        Kairo::with_transport(config, probe, Arc::new(MockTransport::new())).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = KairoConfig {
            network_max_concurrent: 0,
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::new(snapshot(0.9)));
        let result = Kairo::with_transport(config, probe, Arc::new(MockTransport::new()));
        assert!(matches!(result, Err(KairoError::Config(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_start_derives_initial_policy() {
        let probe = Arc::new(MockProbe::new(snapshot(0.95)));
        let kairo = facade_with(probe);

        kairo.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(kairo.current_policy().health_level, HealthLevel::High);
        assert_eq!(kairo.max_concurrent_requests(), 6);
        assert!(kairo.allow_background_ml());
        assert_eq!(kairo.recommended_image_quality(), ImageVariant::Original);

        kairo.stop().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_start_is_idempotent_and_stop_is_terminal() {
        let probe = Arc::new(MockProbe::new(snapshot(0.95)));
        let kairo = facade_with(probe);

        kairo.start().await;
        kairo.start().await;
        assert!(kairo.is_running());

        kairo.stop().await;
        kairo.stop().await;
        assert!(!kairo.is_running());

        kairo.start().await;
        assert!(!kairo.is_running());
    }

    #[tokio::test]
    #[serial]
    async fn test_policy_stream_receives_current_then_updates() {
        let probe = Arc::new(MockProbe::new(snapshot(0.95)));
        let kairo = facade_with(probe.clone());

        kairo.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut policies = kairo.policy_stream();
        let first = policies.recv().await.unwrap();
        assert_eq!(first.health_level, HealthLevel::High);

        // Degrade enough to leave High (score below 0.7).
        probe.emit_change(HealthSnapshot::new(
            0.1,
            true,
            ThermalState::Serious,
            NetReachability::Satisfied,
            true,
            false,
        ));

        let next = tokio::time::timeout(Duration::from_secs(2), policies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(next.health_level, HealthLevel::High);

        kairo.stop().await;
        assert_eq!(policies.recv().await, None);
    }

    #[tokio::test]
    #[serial]
    async fn test_should_allow_uses_latest_snapshot() {
        let probe = Arc::new(MockProbe::new(snapshot(0.95)));
        let kairo = facade_with(probe.clone());

        kairo.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(kairo.should_allow(OperationKind::MlInference));

        probe.emit_change(HealthSnapshot::new(
            0.9,
            false,
            ThermalState::Serious,
            NetReachability::Satisfied,
            false,
            false,
        ));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(!kairo.should_allow(OperationKind::MlInference));
        assert!(kairo.should_allow(OperationKind::BackgroundTask));

        kairo.stop().await;
    }
}
