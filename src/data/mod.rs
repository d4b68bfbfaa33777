//! Data model shared by the watcher, poller, metrics and dashboard server.
//!
//! Everything here is serialized with camelCase field names because it is
//! delivered verbatim to dashboard clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An agent worktree under monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub name: String,
    pub worktree_path: PathBuf,
    pub last_known_commit_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Add,
    Change,
    Unlink,
}

impl FileChangeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Unlink => "unlink",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeEvent {
    pub kind: FileChangeKind,
    pub absolute_path: PathBuf,
    /// Path relative to the agent worktree, always `/`-separated
    pub relative_path: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEvent {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub agent_id: String,
    pub files_touched: Vec<String>,
}

/// A failure that was contained instead of propagated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub agent_id: Option<String>,
    /// Where the failure happened, e.g. `"git polling"` or `"initialize"`
    pub context: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub agent_id: String,
    pub total_files: u64,
    pub total_commits: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub files_changed: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub total_agents: usize,
    pub active_agents: usize,
    pub total_commits: u64,
    pub total_files: u64,
    /// Oldest first, capped by the activity log capacity
    pub recent_activity: Vec<MonitorEvent>,
}

/// Everything the monitoring core publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum MonitorEvent {
    FileChange(FileChangeEvent),
    Commit(CommitEvent),
    Error(ErrorEvent),
    Metrics(SystemMetrics),
}

impl MonitorEvent {
    /// Agent the event belongs to, if any
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::FileChange(e) => Some(&e.agent_id),
            Self::Commit(e) => Some(&e.agent_id),
            Self::Error(e) => e.agent_id.as_deref(),
            Self::Metrics(_) => None,
        }
    }

    /// When the underlying activity happened
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::FileChange(e) => Some(e.timestamp),
            Self::Commit(e) => Some(e.date),
            Self::Error(e) => Some(e.timestamp),
            Self::Metrics(_) => None,
        }
    }

    /// File and commit events count as agent activity; errors and snapshots do not.
    pub fn is_activity(&self) -> bool {
        matches!(self, Self::FileChange(_) | Self::Commit(_))
    }

    pub fn error(agent_id: Option<&str>, context: &str, error: impl std::fmt::Display) -> Self {
        Self::Error(ErrorEvent {
            agent_id: agent_id.map(|s| s.to_string()),
            context: context.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        })
    }
}
