//! Periodic git polling across all monitored agents.
//!
//! One shared tick visits agents sequentially. For each agent the newest
//! commit is compared to the stored hash; every commit in between is
//! published oldest first (capped per tick). A failure for one agent is
//! published as an error event and polling moves on.

use super::registry::AgentRegistry;
use crate::data::{AgentDescriptor, CommitEvent, MonitorEvent};
use crate::integrations::git::{CommitInfo, GitInspector};
use crate::monitor::events::EventBus;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub const POLL_ERROR_CONTEXT: &str = "git polling";

pub struct GitPoller {
    registry: AgentRegistry,
    git: Arc<dyn GitInspector>,
    bus: EventBus,
    max_commits_per_tick: usize,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks an agent as being polled until dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    agent_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.agent_id);
        }
    }
}

impl GitPoller {
    pub fn new(
        registry: AgentRegistry,
        git: Arc<dyn GitInspector>,
        bus: EventBus,
        max_commits_per_tick: usize,
    ) -> Self {
        Self {
            registry,
            git,
            bus,
            max_commits_per_tick: max_commits_per_tick.max(1),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn begin(&self, agent_id: &str) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(agent_id.to_string()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            agent_id: agent_id.to_string(),
        })
    }

    /// Poll every registered agent once, sequentially.
    pub async fn poll_tick(&self) {
        for agent_id in self.registry.agents() {
            self.poll_agent(&agent_id).await;
        }
    }

    /// Poll one agent. Returns the number of commit events published.
    ///
    /// Skips the agent if a poll for it is already running or it is no
    /// longer registered.
    pub async fn poll_agent(&self, agent_id: &str) -> usize {
        let Some(_guard) = self.begin(agent_id) else {
            debug!(agent_id, "Poll already in flight, skipping");
            return 0;
        };
        // Read after taking the guard so the stored hash is current.
        let Some(agent) = self.registry.descriptor(agent_id) else {
            return 0;
        };

        match self.check_agent(&agent).await {
            Ok(published) => published,
            Err(e) => {
                warn!(agent_id = %agent.agent_id, "Git poll failed: {e:#}");
                self.bus.emit(MonitorEvent::error(
                    Some(agent.agent_id.as_str()),
                    POLL_ERROR_CONTEXT,
                    format!("{e:#}"),
                ));
                0
            }
        }
    }

    async fn check_agent(&self, agent: &AgentDescriptor) -> Result<usize> {
        let path = &agent.worktree_path;
        let latest = self.git.latest_commit(path).await?;

        let Some(last) = agent.last_known_commit_hash.as_deref() else {
            // Nothing to compare against yet: seed silently.
            self.registry.set_last_known_commit(&agent.agent_id, &latest);
            return Ok(0);
        };
        if last == latest {
            return Ok(0);
        }

        let commits = self.new_commits(agent, last, &latest).await?;

        if !self.registry.set_last_known_commit(&agent.agent_id, &latest) {
            debug!(agent_id = %agent.agent_id, "Agent removed during poll, dropping commits");
            return Ok(0);
        }

        let skip = commits.len().saturating_sub(self.max_commits_per_tick);
        if skip > 0 {
            debug!(agent_id = %agent.agent_id, skipped = skip, "Commit range exceeds per-tick cap");
        }

        let mut published = 0;
        for commit in commits.into_iter().skip(skip) {
            debug!(agent_id = %agent.agent_id, hash = %commit.hash, "New commit");
            self.bus
                .emit(MonitorEvent::Commit(to_event(commit, &agent.agent_id)));
            published += 1;
        }
        Ok(published)
    }

    /// Commits in `last..latest`; falls back to just `latest` when the range
    /// is empty (HEAD moved backwards) or unreadable (history rewritten).
    async fn new_commits(
        &self,
        agent: &AgentDescriptor,
        last: &str,
        latest: &str,
    ) -> Result<Vec<CommitInfo>> {
        let path = &agent.worktree_path;
        match self.git.commits_between(path, last, latest).await {
            Ok(commits) if !commits.is_empty() => Ok(commits),
            Ok(_) => Ok(vec![self.git.commit_info(path, latest).await?]),
            Err(e) => {
                debug!(agent_id = %agent.agent_id, "Commit range unavailable ({e:#}), reporting newest only");
                Ok(vec![self.git.commit_info(path, latest).await?])
            }
        }
    }

    /// Run `poll_tick` every `interval` until the returned handle is stopped.
    /// Stopping cancels a tick that is in progress.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = shutdown_rx.changed() => break,
                            _ = self.poll_tick() => {}
                        }
                    }
                }
            }
            debug!("Git poller stopped");
        });

        PollerHandle {
            shutdown_tx,
            task: Some(task),
        }
    }
}

fn to_event(commit: CommitInfo, agent_id: &str) -> CommitEvent {
    CommitEvent {
        hash: commit.hash,
        author: commit.author,
        email: commit.email,
        date: commit.date,
        message: commit.message,
        agent_id: agent_id.to_string(),
        files_touched: commit.files,
    }
}

/// Handle to a running poll loop
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Signal the loop and wait for it to exit. Idempotent.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Git poller task failed: {e}");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}
