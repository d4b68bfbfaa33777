use crate::util::DEFAULT_IGNORED_DIRS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub path: PathBuf,
}

impl AgentConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_commits_per_tick")]
    pub max_commits_per_tick: usize,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_commits_per_tick() -> usize {
    50
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            max_commits_per_tick: default_max_commits_per_tick(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_ignored")]
    pub ignored: Vec<String>,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_ignored() -> Vec<String> {
    DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect()
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            ignored: default_ignored(),
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Period of the `systemMetrics` broadcast; 0 disables it
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8081".to_string()
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_interval_secs: default_metrics_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_recent_activity_cap")]
    pub recent_activity_cap: usize,
}

fn default_recent_activity_cap() -> usize {
    100
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            recent_activity_cap: default_recent_activity_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default = "default_coordination_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_task_board")]
    pub task_board: String,
    /// Recorded as `updatedBy` on every task board write
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_coordination_dir() -> PathBuf {
    PathBuf::from(".coordination")
}

fn default_task_board() -> String {
    "task-board.json".to_string()
}

fn default_actor() -> String {
    "coordinator".to_string()
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            dir: default_coordination_dir(),
            task_board: default_task_board(),
            actor: default_actor(),
        }
    }
}

impl CoordinationConfig {
    pub fn task_board_path(&self) -> PathBuf {
        self.dir.join(&self.task_board)
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let dir = directories::ProjectDirs::from("", "", "agentwatch")
        .context("Could not determine config directory")?
        .config_dir()
        .to_path_buf();
    Ok(dir)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn load(path: Option<&Path>) -> Result<MonitorConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if !path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Run `agentwatch init` to create one.",
            path.display()
        );
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    parse(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
}

pub fn parse(content: &str) -> Result<MonitorConfig> {
    Ok(toml::from_str(content)?)
}

const STARTER_CONFIG: &str = r#"# agentwatch configuration

# One entry per agent worktree.
# [[agents]]
# id = "a1"
# name = "frontend"
# path = "/path/to/worktree"

[polling]
interval_secs = 5
max_commits_per_tick = 50

[watcher]
debounce_ms = 300
ignored = [".git", "node_modules", "target"]

[server]
bind = "127.0.0.1:8081"
metrics_interval_secs = 10

[metrics]
recent_activity_cap = 100

[coordination]
dir = ".coordination"
task_board = "task-board.json"
actor = "coordinator"
"#;

/// Write the starter config. Refuses to overwrite unless `force` is set.
pub fn write_default(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    std::fs::write(path, STARTER_CONFIG)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}
