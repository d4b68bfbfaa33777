//! Test doubles for the collaborators the monitoring core consumes
#![allow(dead_code)]

use agentwatch::commands::BoardStore;
use agentwatch::integrations::git::{CommitInfo, DiffStats, GitInspector};
use agentwatch::server::{Connection, SendError};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub fn commit(hash: &str, message: &str) -> CommitInfo {
    CommitInfo {
        hash: hash.to_string(),
        author: "Test Author".to_string(),
        email: "test@example.com".to_string(),
        date: Utc::now(),
        message: message.to_string(),
        files: vec![format!("{hash}.txt")],
    }
}

#[derive(Default)]
struct RepoState {
    /// Oldest first; the last entry is HEAD
    history: Vec<CommitInfo>,
    failing: bool,
    range_unavailable: bool,
    diff: DiffStats,
}

/// In-memory git keyed by worktree path
#[derive(Default)]
pub struct MockGit {
    repos: Mutex<HashMap<PathBuf, RepoState>>,
    latest_calls: AtomicUsize,
}

impl MockGit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_commit(&self, repo: &Path, hash: &str) {
        let mut repos = self.repos.lock().unwrap();
        repos
            .entry(repo.to_path_buf())
            .or_default()
            .history
            .push(commit(hash, &format!("commit {hash}")));
    }

    pub fn set_failing(&self, repo: &Path, failing: bool) {
        self.repos
            .lock()
            .unwrap()
            .entry(repo.to_path_buf())
            .or_default()
            .failing = failing;
    }

    /// Make `commits_between` fail as if history had been rewritten
    pub fn set_range_unavailable(&self, repo: &Path) {
        self.repos
            .lock()
            .unwrap()
            .entry(repo.to_path_buf())
            .or_default()
            .range_unavailable = true;
    }

    pub fn set_diff(&self, repo: &Path, diff: DiffStats) {
        self.repos
            .lock()
            .unwrap()
            .entry(repo.to_path_buf())
            .or_default()
            .diff = diff;
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    fn with_repo<T>(&self, repo: &Path, f: impl FnOnce(&RepoState) -> Result<T>) -> Result<T> {
        let repos = self.repos.lock().unwrap();
        let state = repos
            .get(repo)
            .ok_or_else(|| anyhow!("not a git repository: {}", repo.display()))?;
        if state.failing {
            return Err(anyhow!("git failed for {}", repo.display()));
        }
        f(state)
    }
}

fn position(state: &RepoState, hash: &str) -> Result<usize> {
    if hash == "HEAD" {
        return state
            .history
            .len()
            .checked_sub(1)
            .ok_or_else(|| anyhow!("no commits"));
    }
    state
        .history
        .iter()
        .position(|c| c.hash == hash)
        .ok_or_else(|| anyhow!("unknown revision {hash}"))
}

#[async_trait]
impl GitInspector for MockGit {
    async fn latest_commit(&self, repo: &Path) -> Result<String> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.with_repo(repo, |state| {
            state
                .history
                .last()
                .map(|c| c.hash.clone())
                .ok_or_else(|| anyhow!("no commits"))
        })
    }

    async fn commits_between(&self, repo: &Path, from: &str, to: &str) -> Result<Vec<CommitInfo>> {
        self.with_repo(repo, |state| {
            if state.range_unavailable {
                return Err(anyhow!("bad revision range {from}..{to}"));
            }
            let start = position(state, from)?;
            let end = position(state, to)?;
            if end <= start {
                return Ok(Vec::new());
            }
            Ok(state.history[start + 1..=end].to_vec())
        })
    }

    async fn commit_info(&self, repo: &Path, hash: &str) -> Result<CommitInfo> {
        self.with_repo(repo, |state| Ok(state.history[position(state, hash)?].clone()))
    }

    async fn commit_count(&self, repo: &Path, from: &str, to: &str) -> Result<u64> {
        self.with_repo(repo, |state| {
            let start = position(state, from)?;
            let end = position(state, to)?;
            Ok(end.saturating_sub(start) as u64)
        })
    }

    async fn diff_stats(&self, repo: &Path, _from: &str, _to: &str) -> Result<DiffStats> {
        self.with_repo(repo, |state| Ok(state.diff))
    }
}

/// Board store held in memory, counting writes
#[derive(Default)]
pub struct MemoryBoardStore {
    content: Mutex<Option<Vec<u8>>>,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryBoardStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_json(json: serde_json::Value) -> Arc<Self> {
        let store = Self::default();
        *store.content.lock().unwrap() = Some(serde_json::to_vec(&json).unwrap());
        Arc::new(store)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn json(&self) -> serde_json::Value {
        let content = self.content.lock().unwrap();
        serde_json::from_slice(content.as_deref().expect("board never written")).unwrap()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl BoardStore for MemoryBoardStore {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("disk unavailable"));
        }
        Ok(self.content.lock().unwrap().clone())
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("disk full"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.content.lock().unwrap() = Some(bytes.to_vec());
        Ok(())
    }
}

/// Connection recording every frame it is handed
pub struct MockConnection {
    open: AtomicBool,
    failing: AtomicBool,
    sent: Mutex<Vec<String>>,
    send_calls: AtomicUsize,
}

impl MockConnection {
    pub fn open() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        let conn = Self::open();
        conn.failing.store(true, Ordering::SeqCst);
        conn
    }

    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open_flag(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    /// `type` field of every frame sent
    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

impl Connection for MockConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, text: &str) -> Result<(), SendError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SendError::Other("socket reset".to_string()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Everything currently buffered on `rx`
pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

/// Wait for the first item matching `pred`, or `None` after `timeout`
pub async fn wait_for<T: Clone>(
    rx: &mut broadcast::Receiver<T>,
    timeout: Duration,
    mut pred: impl FnMut(&T) -> bool,
) -> Option<T> {
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(item) if pred(&item) => return Some(item),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
