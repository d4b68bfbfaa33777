//! Git inspection primitive.
//!
//! The monitor only needs three questions answered about a worktree: what is
//! the newest commit, which commits lie between two hashes, and how big is the
//! diff between two commits. `GitInspector` is the seam; `GitCli` answers them
//! by shelling out to `git`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

/// A single commit as reported by git
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub files_changed: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
}

#[async_trait]
pub trait GitInspector: Send + Sync {
    /// Hash of the commit currently checked out (`HEAD`)
    async fn latest_commit(&self, repo: &Path) -> Result<String>;

    /// Commits reachable from `to` but not from `from`, oldest first
    async fn commits_between(&self, repo: &Path, from: &str, to: &str) -> Result<Vec<CommitInfo>>;

    /// Details for one commit
    async fn commit_info(&self, repo: &Path, hash: &str) -> Result<CommitInfo>;

    /// Number of commits in `from..to`
    async fn commit_count(&self, repo: &Path, from: &str, to: &str) -> Result<u64>;

    /// Aggregated `--numstat` between two commits
    async fn diff_stats(&self, repo: &Path, from: &str, to: &str) -> Result<DiffStats>;
}

/// `GitInspector` backed by the `git` executable
#[derive(Debug, Clone, Default)]
pub struct GitCli;

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "--format=%x1e%H%x1f%an%x1f%ae%x1f%aI%x1f%s";

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, repo: &Path, args: &[&str]) -> Result<String> {
        debug!(args = ?args, dir = %repo.display(), "Running git command");

        let output: Output = Command::new("git")
            .args(args)
            .current_dir(repo)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl GitInspector for GitCli {
    async fn latest_commit(&self, repo: &Path) -> Result<String> {
        let out = self.run(repo, &["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    async fn commits_between(&self, repo: &Path, from: &str, to: &str) -> Result<Vec<CommitInfo>> {
        let range = format!("{from}..{to}");
        let out = self
            .run(repo, &["log", "--reverse", "--name-only", LOG_FORMAT, &range])
            .await?;
        Ok(parse_log(&out))
    }

    async fn commit_info(&self, repo: &Path, hash: &str) -> Result<CommitInfo> {
        let out = self
            .run(repo, &["show", "--name-only", LOG_FORMAT, hash])
            .await?;
        parse_log(&out)
            .into_iter()
            .next()
            .with_context(|| format!("no commit found for {hash}"))
    }

    async fn commit_count(&self, repo: &Path, from: &str, to: &str) -> Result<u64> {
        let range = format!("{from}..{to}");
        let out = self.run(repo, &["rev-list", "--count", &range]).await?;
        out.trim()
            .parse()
            .with_context(|| format!("unexpected rev-list output: {}", out.trim()))
    }

    async fn diff_stats(&self, repo: &Path, from: &str, to: &str) -> Result<DiffStats> {
        let out = self.run(repo, &["diff", "--numstat", from, to]).await?;
        Ok(parse_numstat(&out))
    }
}

/// Parse output produced with [`LOG_FORMAT`] and `--name-only`.
pub fn parse_log(output: &str) -> Vec<CommitInfo> {
    output
        .split(RECORD_SEP)
        .filter(|record| !record.trim().is_empty())
        .filter_map(|record| {
            let mut lines = record.lines();
            let header = lines.next()?;
            let mut fields = header.split(FIELD_SEP);
            let hash = fields.next()?.trim().to_string();
            if hash.is_empty() {
                return None;
            }
            let author = fields.next().unwrap_or_default().to_string();
            let email = fields.next().unwrap_or_default().to_string();
            let date = fields
                .next()
                .and_then(|d| DateTime::parse_from_rfc3339(d.trim()).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            let message = fields.next().unwrap_or_default().to_string();
            let files = lines
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| l.to_string())
                .collect();

            Some(CommitInfo {
                hash,
                author,
                email,
                date,
                message,
                files,
            })
        })
        .collect()
}

/// Sum `git diff --numstat` lines. Binary files (`-\t-\tpath`) count as changed with no lines.
pub fn parse_numstat(output: &str) -> DiffStats {
    let mut stats = DiffStats::default();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.split('\t');
        let added = parts.next().and_then(|n| n.parse::<u64>().ok()).unwrap_or(0);
        let removed = parts.next().and_then(|n| n.parse::<u64>().ok()).unwrap_or(0);
        stats.files_changed += 1;
        stats.lines_added += added;
        stats.lines_removed += removed;
    }
    stats
}
