// src/health/probe.rs
// Device probe abstraction and the deterministic mock used by tests

use crate::errors::ProbeError;
use crate::health::HealthSnapshot;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Callback invoked on OS-level health transitions. Fired from a
/// foreign thread; receivers must forward into their own task before
/// touching state.
pub type ChangeCallback = Box<dyn Fn(HealthSnapshot) + Send + Sync>;

/// Point-in-time reads of battery/thermal/network/disk state.
///
/// `read` carries a soft deadline of 100 ms; the monitor abandons reads
/// that exceed twice its tick period and reuses the previous snapshot.
/// Change callbacks have at-least-once semantics.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    async fn read(&self) -> Result<HealthSnapshot, ProbeError>;

    fn on_change(&self, callback: ChangeCallback);
}

struct MockProbeState {
    current: HealthSnapshot,
    pending_errors: VecDeque<ProbeError>,
    read_delay: Option<Duration>,
    read_count: u64,
}

/// Scripted probe for tests and scenario drivers.
///
/// Reads return the configured snapshot; errors and delays can be
/// injected per read, and `emit_change` simulates an OS transition
/// callback.
pub struct MockProbe {
    state: Mutex<MockProbeState>,
    callbacks: Mutex<Vec<ChangeCallback>>,
}

impl MockProbe {
    pub fn new(initial: HealthSnapshot) -> Self {
        Self {
            state: Mutex::new(MockProbeState {
                current: initial,
                pending_errors: VecDeque::new(),
                read_delay: None,
                read_count: 0,
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Replace the snapshot returned by subsequent reads.
    pub fn set_snapshot(&self, snapshot: HealthSnapshot) {
        self.state.lock().expect("mock probe poisoned").current = snapshot;
    }

    /// Queue an error for the next read; reads drain queued errors
    /// before returning snapshots again.
    pub fn fail_next_read(&self, error: ProbeError) {
        self.state
            .lock()
            .expect("mock probe poisoned")
            .pending_errors
            .push_back(error);
    }

    /// Delay every subsequent read, simulating a slow platform call.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.state.lock().expect("mock probe poisoned").read_delay = delay;
    }

    /// Update the snapshot and fire every registered change callback,
    /// the way a platform notification would.
    pub fn emit_change(&self, snapshot: HealthSnapshot) {
        self.set_snapshot(snapshot.clone());
        let callbacks = self.callbacks.lock().expect("mock probe poisoned");
        for callback in callbacks.iter() {
            callback(snapshot.clone());
        }
    }

    pub fn read_count(&self) -> u64 {
        self.state.lock().expect("mock probe poisoned").read_count
    }
}

#[async_trait]
impl DeviceProbe for MockProbe {
    async fn read(&self) -> Result<HealthSnapshot, ProbeError> {
        let (delay, result) = {
            let mut state = self.state.lock().expect("mock probe poisoned");
            state.read_count += 1;
            let result = match state.pending_errors.pop_front() {
                Some(error) => Err(error),
                None => Ok(state.current.clone()),
            };
            (state.read_delay, result)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        result
    }

    fn on_change(&self, callback: ChangeCallback) {
        self.callbacks
            .lock()
            .expect("mock probe poisoned")
            .push(callback);
    }
}
