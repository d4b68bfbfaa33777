//! Recursive file watcher for one agent worktree
//!
//! Uses the notify crate to watch the worktree and a per-watcher tokio task
//! to debounce: events for the same path are held until the path has been
//! quiet for the configured window, then emitted once as a `FileChangeEvent`.

use crate::config::WatcherConfig;
use crate::data::{FileChangeEvent, FileChangeKind, MonitorEvent};
use crate::error::MonitorResult;
use crate::monitor::events::EventBus;
use crate::util::{is_ignored, relative_path};
use chrono::Utc;
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Quiet period before a path's pending event is emitted
    pub debounce: Duration,
    /// Directory names skipped anywhere in the tree
    pub ignored: Vec<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        (&WatcherConfig::default()).into()
    }
}

impl From<&WatcherConfig> for WatchOptions {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            debounce: config.debounce(),
            ignored: config.ignored.clone(),
        }
    }
}

/// Undebounced change reported by notify
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawChange {
    pub kind: FileChangeKind,
    pub path: PathBuf,
}

/// Watcher owning one notify subscription and its debounce task
pub struct FileWatcher {
    agent_id: String,
    watcher: Option<RecommendedWatcher>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Start watching `root` recursively. Must be called inside a tokio runtime.
    ///
    /// `canonical_root` is `root` with symlinks resolved, if known; events
    /// reported under either form map to the same relative path.
    pub fn start(
        agent_id: &str,
        root: &Path,
        canonical_root: Option<PathBuf>,
        options: &WatchOptions,
        bus: EventBus,
    ) -> MonitorResult<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for change in classify_event(&event) {
                        let _ = raw_tx.send(change);
                    }
                }
                Err(e) => tracing::warn!("File watcher error: {e}"),
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let debouncer = Debouncer::new(agent_id, root, canonical_root, options, bus);
        let task = tokio::spawn(debouncer.run(raw_rx, shutdown_rx));

        tracing::debug!(agent_id, root = %root.display(), "Started file watcher");

        Ok(Self {
            agent_id: agent_id.to_string(),
            watcher: Some(watcher),
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// True while the debounce task is running
    pub fn is_active(&self) -> bool {
        self.watcher.is_some() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Close the notify subscription and wait for the debounce task to exit.
    /// Pending (not yet flushed) events are discarded.
    pub async fn stop(&mut self) {
        // Dropping the notify watcher stops new raw events at the source.
        self.watcher.take();
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(agent_id = %self.agent_id, "File watcher task failed: {e}");
            }
        }
        tracing::debug!(agent_id = %self.agent_id, "Stopped file watcher");
    }
}

/// Map a notify event to add/change/unlink per path. Directory events and
/// metadata-only changes produce nothing.
pub(crate) fn classify_event(event: &Event) -> Vec<RawChange> {
    let kind_for = |path: &PathBuf| -> Option<FileChangeKind> {
        match event.kind {
            EventKind::Create(CreateKind::Folder) => None,
            EventKind::Create(_) => Some(FileChangeKind::Add),
            // Renames arrive as From/To halves (or Both); existence tells which side we hold.
            EventKind::Modify(ModifyKind::Name(_)) => Some(if path.exists() {
                FileChangeKind::Add
            } else {
                FileChangeKind::Unlink
            }),
            EventKind::Modify(ModifyKind::Metadata(_)) => None,
            EventKind::Modify(_) => Some(FileChangeKind::Change),
            EventKind::Remove(RemoveKind::Folder) => None,
            EventKind::Remove(_) => Some(FileChangeKind::Unlink),
            _ => None,
        }
    };

    event
        .paths
        .iter()
        .filter_map(|path| {
            kind_for(path).map(|kind| RawChange {
                kind,
                path: path.clone(),
            })
        })
        .collect()
}

/// Merge a new event into a pending one for the same path.
///
/// Returns `None` when the two cancel out (a file created and removed
/// within one window).
pub(crate) fn coalesce(pending: FileChangeKind, next: FileChangeKind) -> Option<FileChangeKind> {
    use FileChangeKind::*;
    match (pending, next) {
        (Add, Unlink) => None,
        (Add, _) => Some(Add),
        (Unlink, Unlink) => Some(Unlink),
        (Unlink, _) => Some(Change),
        (Change, Unlink) => Some(Unlink),
        (Change, _) => Some(Change),
    }
}

#[derive(Debug)]
struct Pending {
    kind: FileChangeKind,
    deadline: Instant,
}

pub(crate) struct Debouncer {
    agent_id: String,
    root: PathBuf,
    /// Some platforms report canonical paths (e.g. /private/var on macOS)
    canonical_root: Option<PathBuf>,
    ignored: Vec<String>,
    window: Duration,
    bus: EventBus,
}

impl Debouncer {
    pub(crate) fn new(
        agent_id: &str,
        root: &Path,
        canonical_root: Option<PathBuf>,
        options: &WatchOptions,
        bus: EventBus,
    ) -> Self {
        let canonical_root = canonical_root.filter(|c| c.as_path() != root);
        Self {
            agent_id: agent_id.to_string(),
            root: root.to_path_buf(),
            canonical_root,
            ignored: options.ignored.clone(),
            window: options.debounce,
            bus,
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        relative_path(&self.root, path).or_else(|| {
            self.canonical_root
                .as_deref()
                .and_then(|root| relative_path(root, path))
        })
    }

    pub(crate) async fn run(
        self,
        mut raw_rx: mpsc::UnboundedReceiver<RawChange>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut pending: HashMap<PathBuf, Pending> = HashMap::new();

        loop {
            let next_deadline = pending.values().map(|p| p.deadline).min();
            tokio::select! {
                _ = shutdown.changed() => break,
                raw = raw_rx.recv() => match raw {
                    Some(change) => self.absorb(&mut pending, change),
                    None => break,
                },
                _ = sleep_until(next_deadline) => self.flush_due(&mut pending),
            }
        }

        if !pending.is_empty() {
            tracing::debug!(
                agent_id = %self.agent_id,
                dropped = pending.len(),
                "Discarding pending file events on shutdown"
            );
        }
    }

    fn absorb(&self, pending: &mut HashMap<PathBuf, Pending>, change: RawChange) {
        let Some(rel) = self.relative(&change.path) else {
            return;
        };
        if rel.is_empty() || is_ignored(&rel, &self.ignored) {
            return;
        }

        let deadline = Instant::now() + self.window;
        match pending.get_mut(&change.path) {
            Some(existing) => match coalesce(existing.kind, change.kind) {
                Some(kind) => {
                    existing.kind = kind;
                    existing.deadline = deadline;
                }
                None => {
                    pending.remove(&change.path);
                }
            },
            None => {
                pending.insert(
                    change.path,
                    Pending {
                        kind: change.kind,
                        deadline,
                    },
                );
            }
        }
    }

    fn flush_due(&self, pending: &mut HashMap<PathBuf, Pending>) {
        let now = Instant::now();
        let mut due: Vec<(PathBuf, Pending)> = Vec::new();
        pending.retain(|path, p| {
            if p.deadline <= now {
                due.push((path.clone(), Pending { kind: p.kind, deadline: p.deadline }));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(_, p)| p.deadline);

        for (path, p) in due {
            if p.kind != FileChangeKind::Unlink && path.is_dir() {
                continue;
            }
            let Some(relative_path) = self.relative(&path) else {
                continue;
            };
            tracing::debug!(agent_id = %self.agent_id, kind = p.kind.label(), path = %relative_path, "File change");
            self.bus.emit(MonitorEvent::FileChange(FileChangeEvent {
                kind: p.kind,
                absolute_path: path,
                relative_path,
                agent_id: self.agent_id.clone(),
                timestamp: Utc::now(),
            }));
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
