//! Closable publish/subscribe bus for [`MonitorEvent`]s.
//!
//! Watchers and the poller publish here; the service relays to dashboard
//! clients and its own subscribers. Once closed, `emit` drops everything.

use crate::data::MonitorEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
    open: Arc<AtomicBool>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns false if the bus is closed.
    pub fn emit(&self, event: MonitorEvent) -> bool {
        if !self.is_open() {
            tracing::trace!("Event bus closed, dropping event");
            return false;
        }
        // No receivers is not an error: nobody is listening yet.
        if self.tx.send(event).is_err() {
            tracing::trace!("Event published with no subscribers");
        }
        true
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
