//! Task board persistence
//!
//! The board is a JSON document shared by every agent. `BoardStore` is the
//! byte-level read/write seam; `TaskBoardRepository` serializes
//! read-modify-write cycles in this process, and `FileBoardStore` holds an
//! exclusive file lock across each cycle so other processes cannot interleave.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Verified,
}

pub const DEFAULT_PRIORITY: &str = "medium";

fn default_priority() -> String {
    DEFAULT_PRIORITY.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Free-form (`high`, `medium`, ...) so values from other tools survive a rewrite
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    /// Fields written by other tools, preserved on rewrite
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Todo,
            priority: default_priority(),
            assigned_to: None,
            dependencies: Vec::new(),
            estimated_hours: None,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBoardEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active_tasks: Vec<String>,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardMetrics {
    #[serde(default)]
    pub total_tasks: usize,
    #[serde(default)]
    pub completed_tasks: usize,
    #[serde(default)]
    pub in_progress_tasks: usize,
    #[serde(default)]
    pub average_completion_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBoard {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentBoardEntry>,
    #[serde(default)]
    pub metrics: BoardMetrics,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self {
            version: default_version(),
            last_updated: None,
            updated_by: None,
            tasks: Vec::new(),
            agents: BTreeMap::new(),
            metrics: BoardMetrics::default(),
            extra: serde_json::Map::new(),
        }
    }
}

impl TaskBoard {
    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Recompute task totals. The average completion time is left as recorded.
    pub fn refresh_metrics(&mut self) {
        self.metrics.total_tasks = self.tasks.len();
        self.metrics.completed_tasks = self.count_with_status(TaskStatus::Done);
        self.metrics.in_progress_tasks = self.count_with_status(TaskStatus::InProgress);
    }
}

/// Byte-level persistence for the board
pub trait BoardStore: Send + Sync {
    /// Current contents, or `None` if nothing has been written yet
    fn read(&self) -> Result<Option<Vec<u8>>>;

    fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Read-modify-write as one step. `edit` gets the current contents and
    /// returns the replacement; nothing is written if it fails.
    ///
    /// Stores shared between processes must hold their lock across the
    /// whole cycle. The default is only atomic within one process.
    fn modify(&self, edit: &mut dyn FnMut(Option<Vec<u8>>) -> Result<Vec<u8>>) -> Result<()> {
        let next = edit(self.read()?)?;
        self.write(&next)
    }
}

/// Board stored as a file, locked with `fs2` and replaced atomically
#[derive(Debug, Clone)]
pub struct FileBoardStore {
    path: PathBuf,
}

impl FileBoardStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn open_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
            .with_context(|| format!("Failed to open lock for {}", self.path.display()))
    }

    // Callers hold the lock file
    fn read_content(&self) -> Result<Option<Vec<u8>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut content = Vec::new();
        File::open(&self.path)
            .and_then(|mut file| file.read_to_end(&mut content))
            .with_context(|| format!("Failed to read task board {}", self.path.display()))?;
        Ok(Some(content))
    }

    fn replace_content(&self, bytes: &[u8]) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let mut file =
            File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }
}

impl BoardStore for FileBoardStore {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let lock = self.open_lock()?;
        lock.lock_shared()?;
        let result = self.read_content();
        lock.unlock()?;
        result
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()?;
        let result = self.replace_content(bytes);
        lock.unlock()?;
        result
    }

    fn modify(&self, edit: &mut dyn FnMut(Option<Vec<u8>>) -> Result<Vec<u8>>) -> Result<()> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()?;
        let result = self
            .read_content()
            .and_then(edit)
            .and_then(|next| self.replace_content(&next));
        lock.unlock()?;
        result
    }
}

/// Serialized access to the task board
pub struct TaskBoardRepository {
    store: Arc<dyn BoardStore>,
    actor: String,
    write_lock: Mutex<()>,
}

impl TaskBoardRepository {
    pub fn new(store: Arc<dyn BoardStore>, actor: impl Into<String>) -> Self {
        Self {
            store,
            actor: actor.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn file(path: impl Into<PathBuf>, actor: impl Into<String>) -> Self {
        Self::new(Arc::new(FileBoardStore::new(path)), actor)
    }

    /// Read the board as it is on disk right now
    pub async fn load(&self) -> Result<TaskBoard> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || read_board(store.as_ref()))
            .await
            .context("Task board reader panicked")?
    }

    /// Read, apply `mutate`, stamp and write back as one locked cycle on the
    /// store. Nothing is written if `mutate` fails.
    pub async fn update<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut TaskBoard) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.write_lock.lock().await;

        let store = Arc::clone(&self.store);
        let actor = self.actor.clone();
        tokio::task::spawn_blocking(move || {
            let mut mutate = Some(mutate);
            let mut out = None;
            store.modify(&mut |current| {
                let mut board = parse_board(current)?;
                let apply = mutate.take().context("Task board edit applied twice")?;
                out = Some(apply(&mut board)?);

                board.last_updated = Some(Utc::now());
                board.updated_by = Some(actor.clone());
                board.refresh_metrics();
                serde_json::to_vec_pretty(&board).context("Failed to encode task board")
            })?;
            out.context("Task board edit never ran")
        })
        .await
        .context("Task board writer panicked")?
    }
}

fn read_board(store: &dyn BoardStore) -> Result<TaskBoard> {
    parse_board(store.read()?)
}

fn parse_board(content: Option<Vec<u8>>) -> Result<TaskBoard> {
    match content {
        None => Ok(TaskBoard::default()),
        Some(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Ok(TaskBoard::default()),
        Some(bytes) => serde_json::from_slice(&bytes).context("Failed to parse task board"),
    }
}
