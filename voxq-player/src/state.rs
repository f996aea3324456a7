//! Shared service state
//!
//! Holds the event broadcast channel observers subscribe to, plus a few
//! process-wide counters reported by the health endpoint.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use voxq_common::events::{EventBus, VoxqEvent};

pub struct SharedState {
    /// Event broadcaster for SSE clients and other observers
    events: EventBus,

    /// Commands accepted through the control API
    commands_total: AtomicU64,

    started_at: DateTime<Utc>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            events: EventBus::new(256),
            commands_total: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    /// Broadcast an event; having no receivers is fine
    pub fn broadcast_event(&self, event: VoxqEvent) {
        self.events.emit(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<VoxqEvent> {
        self.events.subscribe()
    }

    pub fn record_command(&self) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn commands_total(&self) -> u64 {
        self.commands_total.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
