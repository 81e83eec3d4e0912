// src/net/metrics.rs
// Atomic counters for the network client, with a serializable snapshot view

use crate::policy::RequestPriority;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const PRIORITY_SLOTS: usize = 4;

fn priority_index(priority: RequestPriority) -> usize {
    match priority {
        RequestPriority::Low => 0,
        RequestPriority::Normal => 1,
        RequestPriority::High => 2,
        RequestPriority::Critical => 3,
    }
}

fn priority_name(index: usize) -> &'static str {
    match index {
        0 => "low",
        1 => "normal",
        2 => "high",
        _ => "critical",
    }
}

#[derive(Debug, Default)]
struct PriorityCounters {
    requests: AtomicU64,
    successes: AtomicU64,
}

/// Request counters updated on every completed request.
#[derive(Debug, Default)]
pub struct NetworkMetrics {
    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_retries: AtomicU64,
    cumulative_duration_ms: AtomicU64,
    per_priority: [PriorityCounters; PRIORITY_SLOTS],
}

impl NetworkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, priority: RequestPriority, duration: Duration, retries: u32) {
        let slot = &self.per_priority[priority_index(priority)];
        slot.requests.fetch_add(1, Ordering::Relaxed);
        slot.successes.fetch_add(1, Ordering::Relaxed);

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.total_retries.fetch_add(retries as u64, Ordering::Relaxed);
        self.cumulative_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, priority: RequestPriority, duration: Duration, retries: u32) {
        let slot = &self.per_priority[priority_index(priority)];
        slot.requests.fetch_add(1, Ordering::Relaxed);

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.total_retries.fetch_add(retries as u64, Ordering::Relaxed);
        self.cumulative_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_successes.store(0, Ordering::Relaxed);
        self.total_failures.store(0, Ordering::Relaxed);
        self.total_retries.store(0, Ordering::Relaxed);
        self.cumulative_duration_ms.store(0, Ordering::Relaxed);
        for slot in &self.per_priority {
            slot.requests.store(0, Ordering::Relaxed);
            slot.successes.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let cumulative_duration_ms = self.cumulative_duration_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            cumulative_duration_ms,
            mean_duration_ms: if total_requests > 0 {
                cumulative_duration_ms as f64 / total_requests as f64
            } else {
                0.0
            },
            per_priority: self
                .per_priority
                .iter()
                .enumerate()
                .map(|(index, slot)| PrioritySnapshot {
                    priority: priority_name(index),
                    requests: slot.requests.load(Ordering::Relaxed),
                    successes: slot.successes.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }
}

/// Read-only metrics view handed to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_retries: u64,
    pub cumulative_duration_ms: u64,
    pub mean_duration_ms: f64,
    pub per_priority: Vec<PrioritySnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrioritySnapshot {
    pub priority: &'static str,
    pub requests: u64,
    pub successes: u64,
}

impl MetricsSnapshot {
    pub fn for_priority(&self, priority: RequestPriority) -> &PrioritySnapshot {
        &self.per_priority[priority_index(priority)]
    }
}
