//! Per-agent monitoring: file watching, git polling and the registry that
//! owns both.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      AgentRegistry                       │
//! │   a1 ─ FileWatcher     a2 ─ FileWatcher     a3 ─ ...     │
//! └───────────┬─────────────────────┬────────────────────────┘
//!             │ descriptors         │ file events
//!      ┌──────┴──────┐              │
//!      │  GitPoller  │ (one tick,   │
//!      │             │  sequential) │
//!      └──────┬──────┘              │
//!             │ commit/error events │
//!             └──────────┬──────────┘
//!                     EventBus
//! ```

pub mod poller;
pub mod registry;
pub mod watcher;

pub use poller::{GitPoller, PollerHandle};
pub use registry::AgentRegistry;
pub use watcher::{FileWatcher, WatchOptions};
