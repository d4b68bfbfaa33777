//! Recent-activity history.
//!
//! `RingBuffer` is a fixed-capacity FIFO: pushing past capacity evicts the
//! oldest entry and insertion order is preserved. `ActivityLog` keeps one of
//! those for the dashboard plus the latest activity time per agent, which
//! survives eviction from the ring.

use crate::data::MonitorEvent;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Contents, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[derive(Debug)]
struct ActivityState {
    recent: RingBuffer<MonitorEvent>,
    last_activity: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ActivityLog {
    state: Mutex<ActivityState>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ActivityState {
                recent: RingBuffer::new(capacity),
                last_activity: HashMap::new(),
            }),
        }
    }

    /// Record a file or commit event. Other event kinds are ignored.
    pub fn record(&self, event: &MonitorEvent) {
        if !event.is_activity() {
            return;
        }
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Activity log lock poisoned: {e}");
                return;
            }
        };
        if let (Some(agent_id), Some(ts)) = (event.agent_id(), event.timestamp()) {
            let entry = state
                .last_activity
                .entry(agent_id.to_string())
                .or_insert(ts);
            if ts > *entry {
                *entry = ts;
            }
        }
        state.recent.push(event.clone());
    }

    pub fn recent(&self) -> Vec<MonitorEvent> {
        self.state
            .lock()
            .map(|s| s.recent.to_vec())
            .unwrap_or_default()
    }

    pub fn last_activity(&self, agent_id: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.last_activity.get(agent_id).copied())
    }

    /// Drop the per-agent timestamp when an agent stops being monitored.
    pub fn forget(&self, agent_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.last_activity.remove(agent_id);
        }
    }
}
