//! The orchestrator tying registry, poller, metrics and dashboard together.

use super::activity::ActivityLog;
use super::events::EventBus;
use super::metrics::MetricsAggregator;
use crate::agents::{AgentRegistry, GitPoller, PollerHandle, WatchOptions};
use crate::config::MonitorConfig;
use crate::data::{AgentDescriptor, AgentMetrics, MonitorEvent, SystemMetrics};
use crate::error::{MonitorError, MonitorResult};
use crate::integrations::git::GitInspector;
use crate::server::EventBroadcaster;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const INITIALIZE_ERROR_CONTEXT: &str = "initialize";

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    poller: Option<PollerHandle>,
    relay: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

pub struct MonitoringService {
    config: MonitorConfig,
    bus: EventBus,
    registry: AgentRegistry,
    poller: Arc<GitPoller>,
    metrics: MetricsAggregator,
    broadcaster: Option<Arc<EventBroadcaster>>,
    listeners: broadcast::Sender<MonitorEvent>,
    lifecycle: Mutex<Lifecycle>,
    stopped: AtomicBool,
}

impl MonitoringService {
    pub fn new(config: MonitorConfig, git: Arc<dyn GitInspector>) -> Self {
        let bus = EventBus::new();
        let registry = AgentRegistry::new(
            git.clone(),
            bus.clone(),
            WatchOptions::from(&config.watcher),
        );
        let poller = Arc::new(GitPoller::new(
            registry.clone(),
            git.clone(),
            bus.clone(),
            config.polling.max_commits_per_tick,
        ));
        let activity = Arc::new(ActivityLog::new(config.metrics.recent_activity_cap));
        let metrics = MetricsAggregator::new(
            registry.clone(),
            git,
            activity,
            config.watcher.ignored.clone(),
        );
        let (listeners, _) = broadcast::channel(1024);

        Self {
            config,
            bus,
            registry,
            poller,
            metrics,
            broadcaster: None,
            listeners,
            lifecycle: Mutex::new(Lifecycle::default()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Relay events to dashboard clients as well as to local subscribers.
    pub fn with_broadcaster(mut self, broadcaster: Arc<EventBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Start monitoring every configured agent and begin polling.
    ///
    /// An agent that fails to start is reported as an error event; the rest
    /// still start. Calling this twice is a no-op.
    pub async fn initialize(&self) -> MonitorResult<()> {
        if self.is_stopped() {
            return Err(MonitorError::Stopped);
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.initialized {
            debug!("Monitoring service already initialized");
            return Ok(());
        }

        // Subscribe before any agent starts so startup errors reach listeners
        lifecycle.relay = Some(self.spawn_relay());

        let mut started = 0;
        for agent in &self.config.agents {
            match self
                .registry
                .add_agent(&agent.id, agent.display_name(), &agent.path)
                .await
            {
                Ok(_) => started += 1,
                Err(e) => {
                    warn!(agent_id = %agent.id, "Failed to start monitoring: {e}");
                    self.bus.emit(MonitorEvent::error(
                        Some(agent.id.as_str()),
                        INITIALIZE_ERROR_CONTEXT,
                        &e,
                    ));
                }
            }
        }

        lifecycle.poller = Some(self.poller.clone().spawn(self.config.polling.interval()));
        lifecycle.initialized = true;
        info!(
            started,
            configured = self.config.agents.len(),
            "Monitoring service initialized"
        );
        Ok(())
    }

    /// Events relayed by the service, in publication order
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.listeners.subscribe()
    }

    pub async fn add_agent(
        &self,
        agent_id: &str,
        name: &str,
        path: impl AsRef<Path>,
    ) -> MonitorResult<AgentDescriptor> {
        if self.is_stopped() {
            return Err(MonitorError::Stopped);
        }
        self.registry.add_agent(agent_id, name, path).await
    }

    pub async fn remove_agent(&self, agent_id: &str) -> MonitorResult<AgentDescriptor> {
        let descriptor = self.registry.remove_agent(agent_id).await?;
        self.metrics.activity().forget(agent_id);
        Ok(descriptor)
    }

    pub fn agents(&self) -> Vec<String> {
        self.registry.agents()
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub async fn get_agent_metrics(&self, agent_id: &str) -> MonitorResult<AgentMetrics> {
        self.metrics.agent_metrics(agent_id).await
    }

    pub async fn get_system_metrics(&self) -> SystemMetrics {
        self.metrics.system_metrics().await
    }

    /// Run one poll pass outside the timer
    pub async fn poll_now(&self) {
        if !self.is_stopped() {
            self.poller.poll_tick().await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Tear everything down. Once this returns nothing else is emitted,
    /// locally or to dashboard clients. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus.close();

        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(mut poller) = lifecycle.poller.take() {
            poller.stop().await;
        }
        self.registry.stop_all().await;

        if let Some((shutdown_tx, task)) = lifecycle.relay.take() {
            let _ = shutdown_tx.send(true);
            if let Err(e) = task.await {
                warn!("Event relay task failed: {e}");
            }
        }

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.close().await;
        }
        info!("Monitoring service stopped");
    }

    fn spawn_relay(&self) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay = Relay {
            events: self.bus.subscribe(),
            bus: self.bus.clone(),
            listeners: self.listeners.clone(),
            metrics: self.metrics.clone(),
            broadcaster: self.broadcaster.clone(),
        };
        let interval = match self.config.server.metrics_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let task = tokio::spawn(relay.run(interval, shutdown_rx));
        (shutdown_tx, task)
    }
}

struct Relay {
    events: broadcast::Receiver<MonitorEvent>,
    bus: EventBus,
    listeners: broadcast::Sender<MonitorEvent>,
    metrics: MetricsAggregator,
    broadcaster: Option<Arc<EventBroadcaster>>,
}

impl Relay {
    async fn run(mut self, metrics_interval: Option<Duration>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = metrics_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = self.events.recv() => match received {
                    Ok(event) => self.forward(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event relay lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = next_tick(&mut ticker) => {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        snapshot = self.metrics.system_metrics() => {
                            self.bus.emit(MonitorEvent::Metrics(snapshot));
                        }
                    }
                }
            }
        }
        debug!("Event relay stopped");
    }

    fn forward(&self, event: MonitorEvent) {
        self.metrics.record(&event);

        if let Some(broadcaster) = &self.broadcaster {
            match &event {
                MonitorEvent::FileChange(change) => {
                    broadcaster.broadcast_file_change(change);
                }
                MonitorEvent::Commit(commit) => {
                    broadcaster.broadcast_git_commit(commit);
                }
                MonitorEvent::Metrics(snapshot) => {
                    broadcaster.broadcast_system_metrics(snapshot);
                }
                MonitorEvent::Error(_) => {}
            }
        }

        if let MonitorEvent::Error(err) = &event {
            warn!(agent_id = ?err.agent_id, context = %err.context, "{}", err.error);
        }

        // No local listeners is fine
        let _ = self.listeners.send(event);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
