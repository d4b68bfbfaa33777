//! JSON messages exchanged with dashboard clients.

use crate::data::{CommitEvent, FileChangeEvent, SystemMetrics};
use serde::{Deserialize, Serialize};

pub const FILE_CHANGES: &str = "fileChanges";
pub const GIT_COMMITS: &str = "gitCommits";
pub const SYSTEM_METRICS: &str = "systemMetrics";

pub const CHANNELS: [&str; 3] = [FILE_CHANGES, GIT_COMMITS, SYSTEM_METRICS];

pub fn is_known_channel(name: &str) -> bool {
    CHANNELS.contains(&name)
}

pub const WELCOME_MESSAGE: &str = "Connected to agentwatch";

/// Client → server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Ping,
    Subscribe { channel: String },
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Welcome { message: String },
    Pong,
    Subscribed { channel: String },
    FileChange { data: FileChangeEvent },
    GitCommit { data: CommitEvent },
    SystemMetrics { data: SystemMetrics },
}

impl ServerMessage {
    pub fn welcome() -> Self {
        Self::Welcome {
            message: WELCOME_MESSAGE.to_string(),
        }
    }

    /// Broadcast channel this message belongs to, if it is a broadcast
    pub fn channel(&self) -> Option<&'static str> {
        match self {
            Self::FileChange { .. } => Some(FILE_CHANGES),
            Self::GitCommit { .. } => Some(GIT_COMMITS),
            Self::SystemMetrics { .. } => Some(SYSTEM_METRICS),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
