//! Registry of monitored agents.
//!
//! Each registered agent owns exactly one live [`FileWatcher`]; the shared
//! git poller reads descriptors from here on every tick. Registration is
//! all-or-nothing: a caller never observes an agent whose watcher is not
//! running.

use super::watcher::{FileWatcher, WatchOptions};
use crate::data::AgentDescriptor;
use crate::error::{MonitorError, MonitorResult};
use crate::integrations::git::GitInspector;
use crate::monitor::events::EventBus;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

struct AgentEntry {
    descriptor: AgentDescriptor,
    /// Commit the agent was at when first observed; metrics diff against it
    baseline_hash: Option<String>,
    watcher: FileWatcher,
}

struct RegistryInner {
    agents: RwLock<HashMap<String, AgentEntry>>,
    git: Arc<dyn GitInspector>,
    bus: EventBus,
    options: WatchOptions,
    closed: AtomicBool,
}

/// Cheaply cloneable handle to the shared registry
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
}

impl AgentRegistry {
    pub fn new(git: Arc<dyn GitInspector>, bus: EventBus, options: WatchOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                agents: RwLock::new(HashMap::new()),
                git,
                bus,
                options,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Start monitoring `path` as `agent_id`.
    ///
    /// A failing initial git read is logged and leaves the commit hash unset;
    /// the poller seeds it on its first successful read.
    pub async fn add_agent(
        &self,
        agent_id: &str,
        name: &str,
        path: impl AsRef<Path>,
    ) -> MonitorResult<AgentDescriptor> {
        let path = path.as_ref();

        if self.is_closed() {
            return Err(MonitorError::Stopped);
        }
        if self.contains(agent_id) {
            return Err(MonitorError::AlreadyMonitored(agent_id.to_string()));
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| MonitorError::PathNotFound(path.to_path_buf()))?;
        if !metadata.is_dir() {
            return Err(MonitorError::NotADirectory(path.to_path_buf()));
        }

        let canonical = tokio::fs::canonicalize(path).await.ok();
        let mut watcher = FileWatcher::start(
            agent_id,
            path,
            canonical,
            &self.inner.options,
            self.inner.bus.clone(),
        )?;

        let initial_hash = match self.inner.git.latest_commit(path).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(agent_id, "Initial git read failed, monitoring anyway: {e:#}");
                None
            }
        };

        let descriptor = AgentDescriptor {
            agent_id: agent_id.to_string(),
            name: name.to_string(),
            worktree_path: path.to_path_buf(),
            last_known_commit_hash: initial_hash.clone(),
        };

        // Re-check under the write lock: a concurrent add or stop may have won.
        let rejection = match self.inner.agents.write() {
            Ok(mut agents) => {
                if self.is_closed() {
                    Some(MonitorError::Stopped)
                } else if agents.contains_key(agent_id) {
                    Some(MonitorError::AlreadyMonitored(agent_id.to_string()))
                } else {
                    agents.insert(
                        agent_id.to_string(),
                        AgentEntry {
                            descriptor: descriptor.clone(),
                            baseline_hash: initial_hash,
                            watcher,
                        },
                    );
                    info!(agent_id, path = %path.display(), "Monitoring agent");
                    return Ok(descriptor);
                }
            }
            Err(e) => {
                warn!("Agent registry lock poisoned: {e}");
                Some(MonitorError::Stopped)
            }
        };

        watcher.stop().await;
        Err(rejection.unwrap_or(MonitorError::Stopped))
    }

    /// Stop monitoring `agent_id`, closing its watcher.
    pub async fn remove_agent(&self, agent_id: &str) -> MonitorResult<AgentDescriptor> {
        let removed = match self.inner.agents.write() {
            Ok(mut agents) => agents.remove(agent_id),
            Err(e) => {
                warn!("Agent registry lock poisoned: {e}");
                None
            }
        };

        let mut entry = removed.ok_or_else(|| MonitorError::NotMonitored(agent_id.to_string()))?;
        entry.watcher.stop().await;
        info!(agent_id, "Stopped monitoring agent");
        Ok(entry.descriptor)
    }

    /// Ids of all monitored agents, sorted
    pub fn agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .agents
            .read()
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn descriptor(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.inner
            .agents
            .read()
            .ok()
            .and_then(|a| a.get(agent_id).map(|e| e.descriptor.clone()))
    }

    /// Snapshot of every descriptor, sorted by id
    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        let mut all: Vec<AgentDescriptor> = self
            .inner
            .agents
            .read()
            .map(|a| a.values().map(|e| e.descriptor.clone()).collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    pub fn baseline_hash(&self, agent_id: &str) -> MonitorResult<Option<String>> {
        self.inner
            .agents
            .read()
            .ok()
            .and_then(|a| a.get(agent_id).map(|e| e.baseline_hash.clone()))
            .ok_or_else(|| MonitorError::NotMonitored(agent_id.to_string()))
    }

    /// Record the newest commit seen for an agent. Also seeds the baseline if
    /// the initial read failed. Returns false if the agent is gone.
    pub fn set_last_known_commit(&self, agent_id: &str, hash: &str) -> bool {
        match self.inner.agents.write() {
            Ok(mut agents) => match agents.get_mut(agent_id) {
                Some(entry) => {
                    entry.descriptor.last_known_commit_hash = Some(hash.to_string());
                    if entry.baseline_hash.is_none() {
                        entry.baseline_hash = Some(hash.to_string());
                    }
                    true
                }
                None => false,
            },
            Err(e) => {
                warn!("Agent registry lock poisoned: {e}");
                false
            }
        }
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.inner
            .agents
            .read()
            .map(|a| a.contains_key(agent_id))
            .unwrap_or(false)
    }

    /// True if the agent is registered and its watcher task is running
    pub fn is_watching(&self, agent_id: &str) -> bool {
        self.inner
            .agents
            .read()
            .ok()
            .and_then(|a| a.get(agent_id).map(|e| e.watcher.is_active()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.agents.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close every watcher and refuse further registrations. Idempotent.
    pub async fn stop_all(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let drained: Vec<AgentEntry> = match self.inner.agents.write() {
            Ok(mut agents) => agents.drain().map(|(_, e)| e).collect(),
            Err(e) => {
                warn!("Agent registry lock poisoned: {e}");
                Vec::new()
            }
        };

        for mut entry in drained {
            entry.watcher.stop().await;
        }
    }
}
