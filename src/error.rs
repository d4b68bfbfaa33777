//! Typed errors for agent registration, watching and metrics.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("agent already monitored: {0}")]
    AlreadyMonitored(String),

    #[error("agent not monitored: {0}")]
    NotMonitored(String),

    #[error("failed to watch directory: {0}")]
    Watch(#[from] notify::Error),

    #[error("git inspection failed: {0}")]
    Git(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("monitoring service has been stopped")]
    Stopped,
}

impl MonitorError {
    /// Wrap a collaborator failure (usually an `anyhow::Error` from git).
    pub fn git(err: impl std::fmt::Display) -> Self {
        Self::Git(err.to_string())
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
