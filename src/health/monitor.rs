// src/health/monitor.rs
// Periodic + event-driven health observation with debounced broadcast

use crate::config::KairoConfig;
use crate::health::probe::DeviceProbe;
use crate::health::{HealthSnapshot, NetReachability, ThermalState};
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Multi-consumer subscription handle for health snapshots.
///
/// Each new subscriber first receives the current snapshot, then every
/// subsequent broadcast. Dropping the handle unregisters the
/// subscriber; a closed monitor ends the stream with `None`.
pub struct HealthStream {
    rx: mpsc::UnboundedReceiver<HealthSnapshot>,
}

impl HealthStream {
    pub async fn recv(&mut self) -> Option<HealthSnapshot> {
        self.rx.recv().await
    }
}

impl Stream for HealthStream {
    type Item = HealthSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Observation counters, updated by the monitor task.
#[derive(Debug, Default)]
struct MonitorCounters {
    probe_reads: AtomicU64,
    failed_reads: AtomicU64,
    publishes: AtomicU64,
    suppressed_changes: AtomicU64,
    critical_bypasses: AtomicU64,
}

/// Serializable view of the monitor's counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MonitorMetrics {
    pub probe_reads: u64,
    pub failed_reads: u64,
    pub publishes: u64,
    pub suppressed_changes: u64,
    pub critical_bypasses: u64,
    pub is_running: bool,
}

struct MonitorShared {
    current: RwLock<Option<HealthSnapshot>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<HealthSnapshot>>>,
    counters: MonitorCounters,
}

impl MonitorShared {
    /// Record a published snapshot and fan it out. Subscribers whose
    /// receiving end is gone are pruned here.
    fn publish(&self, snapshot: HealthSnapshot) {
        *self.current.write().expect("monitor current poisoned") = Some(snapshot.clone());
        self.counters.publishes.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock().expect("monitor subscribers poisoned");
        subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());

        debug!(
            score = snapshot.health_score(),
            critical = snapshot.is_critical(),
            subscribers = subscribers.len(),
            "health snapshot published"
        );
    }

    fn close_streams(&self) {
        self.subscribers
            .lock()
            .expect("monitor subscribers poisoned")
            .clear();
    }
}

/// Long-lived observer producing a deduplicated, debounced snapshot
/// stream.
///
/// The periodic tick and the probe's foreign-thread change callbacks
/// both funnel into the monitor task through an internal channel, so
/// all state mutation is serialized on that task.
pub struct HealthMonitor {
    probe: Arc<dyn DeviceProbe>,
    config: KairoConfig,
    shared: Arc<MonitorShared>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn DeviceProbe>, config: KairoConfig) -> Self {
        Self {
            probe,
            config,
            shared: Arc::new(MonitorShared {
                current: RwLock::new(None),
                subscribers: Mutex::new(Vec::new()),
                counters: MonitorCounters::default(),
            }),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start observing: read and publish an initial snapshot, subscribe
    /// to probe change events, and schedule periodic reads. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        *self.cancel.lock().expect("monitor cancel poisoned") = Some(token.clone());

        // Forward foreign-thread probe callbacks onto the monitor task.
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        self.probe.on_change(Box::new(move |snapshot| {
            let _ = change_tx.send(snapshot);
        }));

        // Initial snapshot is published unconditionally.
        let initial = match read_candidate(
            self.probe.as_ref(),
            self.config.probe_deadline(),
            &self.shared.counters,
        )
        .await
        {
            Some(snapshot) => snapshot,
            None => {
                warn!("initial probe read failed; starting from optimistic defaults");
                optimistic_default()
            }
        };
        self.shared.publish(initial.clone());
        info!(score = initial.health_score(), "health monitor started");

        let probe = self.probe.clone();
        let config = self.config.clone();
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            monitor_loop(probe, config, shared, change_rx, initial, token).await;
        });
        *self.task.lock().expect("monitor task poisoned") = Some(handle);
    }

    /// Stop observing: cancel the timer and probe subscription, close
    /// every subscriber stream. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(token) = self.cancel.lock().expect("monitor cancel poisoned").take() {
            token.cancel();
        }

        let handle = self.task.lock().expect("monitor task poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.shared.close_streams();
        info!("health monitor stopped");
    }

    /// Latest published snapshot. Before the first probe read lands the
    /// monitor reports optimistic defaults.
    pub fn current(&self) -> HealthSnapshot {
        self.shared
            .current
            .read()
            .expect("monitor current poisoned")
            .clone()
            .unwrap_or_else(optimistic_default)
    }

    /// Subscribe to the broadcast. The current snapshot is delivered
    /// first, then every future publish.
    pub fn stream(&self) -> HealthStream {
        let (tx, rx) = mpsc::unbounded_channel();

        let current = self
            .shared
            .current
            .read()
            .expect("monitor current poisoned")
            .clone();
        if let Some(snapshot) = current {
            let _ = tx.send(snapshot);
        }

        self.shared
            .subscribers
            .lock()
            .expect("monitor subscribers poisoned")
            .push(tx);

        HealthStream { rx }
    }

    /// Live subscriber count, pruning handles that have been dropped.
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .expect("monitor subscribers poisoned")
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Observation counters for diagnostics.
    pub fn metrics(&self) -> MonitorMetrics {
        let counters = &self.shared.counters;
        MonitorMetrics {
            probe_reads: counters.probe_reads.load(Ordering::Relaxed),
            failed_reads: counters.failed_reads.load(Ordering::Relaxed),
            publishes: counters.publishes.load(Ordering::Relaxed),
            suppressed_changes: counters.suppressed_changes.load(Ordering::Relaxed),
            critical_bypasses: counters.critical_bypasses.load(Ordering::Relaxed),
            is_running: self.is_running(),
        }
    }
}

/// Neutral snapshot used before the first successful probe read.
fn optimistic_default() -> HealthSnapshot {
    HealthSnapshot::new(
        1.0,
        false,
        ThermalState::Nominal,
        NetReachability::Satisfied,
        false,
        false,
    )
}

/// One probe read with the unresponsiveness deadline applied. `None`
/// means the previous snapshot should be retained.
async fn read_candidate(
    probe: &dyn DeviceProbe,
    deadline: Duration,
    counters: &MonitorCounters,
) -> Option<HealthSnapshot> {
    counters.probe_reads.fetch_add(1, Ordering::Relaxed);
    match tokio::time::timeout(deadline, probe.read()).await {
        Ok(Ok(snapshot)) => Some(snapshot),
        Ok(Err(error)) => {
            counters.failed_reads.fetch_add(1, Ordering::Relaxed);
            warn!(code = error.code(), %error, "probe read failed; retaining previous snapshot");
            None
        }
        Err(_) => {
            counters.failed_reads.fetch_add(1, Ordering::Relaxed);
            warn!(
                deadline_ms = deadline.as_millis() as u64,
                "probe read unresponsive; retaining previous snapshot"
            );
            None
        }
    }
}

async fn monitor_loop(
    probe: Arc<dyn DeviceProbe>,
    config: KairoConfig,
    shared: Arc<MonitorShared>,
    mut change_rx: mpsc::UnboundedReceiver<HealthSnapshot>,
    mut last_published: HealthSnapshot,
    token: CancellationToken,
) {
    let tick_period = config.tick_period();
    let debounce = config.debounce();
    let probe_deadline = config.probe_deadline();

    // First scheduled read happens a full period after the initial
    // publish performed by start().
    let mut ticker = tokio::time::interval_at(TokioInstant::now() + tick_period, tick_period);

    let mut pending: Option<HealthSnapshot> = None;
    let mut pending_deadline = TokioInstant::now();
    let mut change_channel_open = true;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            _ = ticker.tick() => {
                if let Some(candidate) =
                    read_candidate(probe.as_ref(), probe_deadline, &shared.counters).await
                {
                    consider(
                        candidate,
                        &shared,
                        &mut last_published,
                        &mut pending,
                        &mut pending_deadline,
                        debounce,
                    );
                }
            }

            changed = change_rx.recv(), if change_channel_open => {
                match changed {
                    Some(candidate) => consider(
                        candidate,
                        &shared,
                        &mut last_published,
                        &mut pending,
                        &mut pending_deadline,
                        debounce,
                    ),
                    // Probe callback channel closed; ticks keep going.
                    None => change_channel_open = false,
                }
            }

            _ = tokio::time::sleep_until(pending_deadline), if pending.is_some() => {
                if let Some(snapshot) = pending.take() {
                    last_published = snapshot.clone();
                    shared.publish(snapshot);
                }
            }
        }
    }
}

/// Apply the significant-change predicate and debounce window to a
/// candidate snapshot. Critical flips bypass the window entirely.
fn consider(
    candidate: HealthSnapshot,
    shared: &MonitorShared,
    last_published: &mut HealthSnapshot,
    pending: &mut Option<HealthSnapshot>,
    pending_deadline: &mut TokioInstant,
    debounce: Duration,
) {
    if !candidate.differs_significantly_from(last_published) {
        shared
            .counters
            .suppressed_changes
            .fetch_add(1, Ordering::Relaxed);
        return;
    }

    if candidate.is_critical() && !last_published.is_critical() {
        debug!("criticality flip; bypassing debounce");
        shared
            .counters
            .critical_bypasses
            .fetch_add(1, Ordering::Relaxed);
        *pending = None;
        *last_published = candidate.clone();
        shared.publish(candidate);
        return;
    }

    // Each significant candidate restarts the quiet window and
    // supersedes whatever was pending.
    *pending = Some(candidate);
    *pending_deadline = TokioInstant::now() + debounce;
}
