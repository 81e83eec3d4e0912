// src/throttle/semaphore.rs
// Counting gate with explicit FIFO waiters, dynamic capacity, and cancellation

use crate::errors::KairoError;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Point-in-time view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SemaphoreStatus {
    pub in_use: u32,
    pub max: u32,
    pub waiting: usize,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct SemaphoreState {
    in_use: u32,
    max: u32,
    active: bool,
    next_waiter_id: u64,
    waiters: VecDeque<Waiter>,
}

/// Bounded counting gate with strict FIFO waiter service.
///
/// The tokio semaphore cannot shrink its ceiling below outstanding
/// permits nor expose its waiter queue, so this gate keeps its own:
/// a single mutex over counters plus a oneshot-waker queue. The lock
/// is never held across an await point.
///
/// A waiter woken by `release` owns the freed permit; `in_use` is
/// transferred under the same lock acquisition, so
/// `in_use <= max` holds at every observable instant (except during a
/// shrink, when permits already granted are allowed to drain).
pub struct AdaptiveSemaphore {
    state: Mutex<SemaphoreState>,
}

impl AdaptiveSemaphore {
    pub fn new(max_permits: u32) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                in_use: 0,
                max: max_permits,
                active: true,
                next_waiter_id: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquire a permit, waiting FIFO behind earlier callers if the gate
    /// is full. Fails with `Cancelled` if the gate is deactivated.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, KairoError> {
        self.acquire_inner(None).await
    }

    /// Acquire a permit, additionally honoring an external cancellation
    /// signal. A cancellation that races with a wake-up releases the
    /// freshly granted permit before returning `Cancelled`.
    pub async fn acquire_with_token(
        &self,
        token: &CancellationToken,
    ) -> Result<SemaphorePermit<'_>, KairoError> {
        self.acquire_inner(Some(token)).await
    }

    async fn acquire_inner(
        &self,
        token: Option<&CancellationToken>,
    ) -> Result<SemaphorePermit<'_>, KairoError> {
        if let Some(token) = token {
            if token.is_cancelled() {
                return Err(KairoError::Cancelled);
            }
        }

        let (waiter_id, mut rx) = {
            let mut state = self.state.lock().expect("semaphore state poisoned");

            if !state.active {
                return Err(KairoError::Cancelled);
            }

            if state.in_use < state.max {
                state.in_use += 1;
                return Ok(SemaphorePermit { semaphore: self });
            }

            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { id, tx });
            (id, rx)
        };

        match token {
            None => match (&mut rx).await {
                // The releaser transferred the permit to us under its lock.
                Ok(()) => Ok(SemaphorePermit { semaphore: self }),
                Err(_) => Err(KairoError::Cancelled),
            },
            Some(token) => {
                tokio::select! {
                    biased;
                    result = &mut rx => match result {
                        Ok(()) => Ok(SemaphorePermit { semaphore: self }),
                        Err(_) => Err(KairoError::Cancelled),
                    },
                    _ = token.cancelled() => {
                        self.abandon_wait(waiter_id, rx);
                        Err(KairoError::Cancelled)
                    }
                }
            }
        }
    }

    /// Remove a cancelled waiter. If the wake-up already happened, the
    /// permit was transferred to us and must be handed back.
    fn abandon_wait(&self, waiter_id: u64, mut rx: oneshot::Receiver<()>) {
        let mut state = self.state.lock().expect("semaphore state poisoned");

        if let Some(pos) = state.waiters.iter().position(|w| w.id == waiter_id) {
            state.waiters.remove(pos);
            return;
        }

        // No queue entry left: release() already woke us under its lock.
        if rx.try_recv().is_ok() {
            state.in_use = state.in_use.saturating_sub(1);
            Self::wake_waiters(&mut state);
        }
    }

    fn release_permit(&self) {
        let mut state = self.state.lock().expect("semaphore state poisoned");
        state.in_use = state.in_use.saturating_sub(1);
        Self::wake_waiters(&mut state);
    }

    /// Hand free capacity to queued waiters in FIFO order. Waiters whose
    /// receiver is gone (cancelled callers) are skipped.
    fn wake_waiters(state: &mut SemaphoreState) {
        while state.active && state.in_use < state.max {
            match state.waiters.pop_front() {
                Some(waiter) => {
                    if waiter.tx.send(()).is_ok() {
                        state.in_use += 1;
                    }
                }
                None => break,
            }
        }
    }

    /// Adjust the capacity ceiling. Growth wakes queued waiters up to
    /// the new ceiling. Shrink never revokes permits already granted;
    /// new acquires simply block until the in-use count drains below
    /// the new ceiling.
    pub fn resize(&self, new_max: u32) {
        let mut state = self.state.lock().expect("semaphore state poisoned");
        let old_max = state.max;
        state.max = new_max;
        if new_max > old_max {
            Self::wake_waiters(&mut state);
        }
        debug!(old_max, new_max, in_use = state.in_use, "semaphore resized");
    }

    pub fn status(&self) -> SemaphoreStatus {
        let state = self.state.lock().expect("semaphore state poisoned");
        SemaphoreStatus {
            in_use: state.in_use,
            max: state.max,
            waiting: state.waiters.iter().filter(|w| !w.tx.is_closed()).count(),
        }
    }

    /// Cancel every queued waiter and refuse all future acquires.
    pub fn deactivate(&self) {
        let mut state = self.state.lock().expect("semaphore state poisoned");
        state.active = false;
        // Dropping the senders resumes every waiter with `Cancelled`.
        state.waiters.clear();
        debug!(in_use = state.in_use, "semaphore deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().expect("semaphore state poisoned").active
    }
}

/// RAII permit; releasing happens on drop, including error paths.
pub struct SemaphorePermit<'a> {
    semaphore: &'a AdaptiveSemaphore,
}

impl SemaphorePermit<'_> {
    /// Explicit release for call sites that want the handoff visible.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release_permit();
    }
}
