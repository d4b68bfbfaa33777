//! On-demand per-agent and system-wide metrics.
//!
//! Nothing here is cached: each call scans the worktree and asks git for the
//! diff against the agent's baseline commit.

use super::activity::ActivityLog;
use crate::agents::AgentRegistry;
use crate::data::{AgentMetrics, MonitorEvent, SystemMetrics};
use crate::error::{MonitorError, MonitorResult};
use crate::integrations::git::GitInspector;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct MetricsAggregator {
    registry: AgentRegistry,
    git: Arc<dyn GitInspector>,
    activity: Arc<ActivityLog>,
    ignored: Vec<String>,
}

impl MetricsAggregator {
    pub fn new(
        registry: AgentRegistry,
        git: Arc<dyn GitInspector>,
        activity: Arc<ActivityLog>,
        ignored: Vec<String>,
    ) -> Self {
        Self {
            registry,
            git,
            activity,
            ignored,
        }
    }

    /// Feed an event into the recent-activity history
    pub fn record(&self, event: &MonitorEvent) {
        self.activity.record(event);
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub async fn agent_metrics(&self, agent_id: &str) -> MonitorResult<AgentMetrics> {
        let agent = self
            .registry
            .descriptor(agent_id)
            .ok_or_else(|| MonitorError::NotMonitored(agent_id.to_string()))?;
        let path = &agent.worktree_path;

        let baseline = match self.registry.baseline_hash(agent_id)? {
            Some(hash) => hash,
            None => self
                .git
                .latest_commit(path)
                .await
                .map_err(MonitorError::git)?,
        };

        let total_files = count_files(path, &self.ignored).await?;
        let total_commits = self
            .git
            .commit_count(path, &baseline, "HEAD")
            .await
            .map_err(MonitorError::git)?;
        let diff = self
            .git
            .diff_stats(path, &baseline, "HEAD")
            .await
            .map_err(MonitorError::git)?;

        Ok(AgentMetrics {
            agent_id: agent_id.to_string(),
            total_files,
            total_commits,
            last_activity: self.activity.last_activity(agent_id),
            files_changed: diff.files_changed,
            lines_added: diff.lines_added,
            lines_removed: diff.lines_removed,
        })
    }

    /// Aggregate across all agents. Agents whose metrics fail are left out
    /// of the sums and of `active_agents`; the snapshot is still returned.
    pub async fn system_metrics(&self) -> SystemMetrics {
        let agent_ids = self.registry.agents();
        let results = join_all(agent_ids.iter().map(|id| self.agent_metrics(id))).await;

        let mut snapshot = SystemMetrics {
            total_agents: agent_ids.len(),
            active_agents: 0,
            total_commits: 0,
            total_files: 0,
            recent_activity: self.activity.recent(),
        };

        for (agent_id, result) in agent_ids.iter().zip(results) {
            match result {
                Ok(m) => {
                    snapshot.active_agents += 1;
                    snapshot.total_commits += m.total_commits;
                    snapshot.total_files += m.total_files;
                }
                Err(e) => tracing::debug!(agent_id = %agent_id, "Excluding agent from metrics: {e}"),
            }
        }

        snapshot
    }
}

/// Count regular files under `root`, skipping ignored directory names.
/// Unreadable subdirectories are skipped; an unreadable root is an error.
pub async fn count_files(root: &Path, ignored: &[String]) -> MonitorResult<u64> {
    let mut count = 0u64;
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    let mut is_root = true;

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if is_root => return Err(e.into()),
            Err(e) => {
                tracing::debug!(dir = %dir.display(), "Skipping unreadable directory: {e}");
                continue;
            }
        };
        is_root = false;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !ignored.iter().any(|i| i.as_str() == &*name) {
                    stack.push(entry.path());
                }
            } else {
                count += 1;
            }
        }
    }

    Ok(count)
}
