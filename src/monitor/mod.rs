//! Event bus, activity history, metrics and the service that owns them.

pub mod activity;
pub mod events;
pub mod metrics;
pub mod service;

pub use activity::{ActivityLog, RingBuffer};
pub use events::EventBus;
pub use metrics::MetricsAggregator;
pub use service::MonitoringService;
