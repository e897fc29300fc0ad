//! Per-session counters and the recent-activity ring.
//!
//! Counters are mutated from the owning session's tasks and read by external
//! observers; reads are lock-free snapshots and may be stale.

use crate::correlate::Exchange;
use gatewire_common::constants::ACTIVITY_RING_CAPACITY;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Cumulative counters for one tunnel session.
#[derive(Debug, Default)]
pub struct SessionStats {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    requests: AtomicU64,
    responses: AtomicU64,
    active_connections: AtomicU64,
    total_connections: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StatSnapshot {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub requests: u64,
    pub responses: u64,
    pub active_connections: u64,
    pub total_connections: u64,
}

impl SessionStats {
    /// Record one completed exchange. Byte counters use the declared
    /// content lengths; bodies without one contribute zero.
    pub fn record_exchange(&self, exchange: &Exchange) {
        self.bytes_received
            .fetch_add(exchange.request.content_length.unwrap_or(0), Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(exchange.response.content_length.unwrap_or(0), Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturating: a close without a matching open keeps the gauge at 0.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-capacity ring of the most recent exchanges, overwriting oldest.
#[derive(Debug)]
pub struct ActivityRing {
    capacity: usize,
    entries: Mutex<VecDeque<Exchange>>,
}

impl Default for ActivityRing {
    fn default() -> Self {
        Self::with_capacity(ACTIVITY_RING_CAPACITY)
    }
}

impl ActivityRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn push(&self, exchange: Exchange) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(exchange);
    }

    /// Newest-last copy of the ring contents.
    pub fn recent(&self) -> Vec<Exchange> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
