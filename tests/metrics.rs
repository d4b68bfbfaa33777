//! MetricsAggregator and the recent-activity history

mod test_utils;

use agentwatch::agents::{AgentRegistry, WatchOptions};
use agentwatch::data::{FileChangeEvent, FileChangeKind, MonitorEvent};
use agentwatch::error::MonitorError;
use agentwatch::integrations::git::DiffStats;
use agentwatch::monitor::{ActivityLog, EventBus, MetricsAggregator};
use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use test_utils::MockGit;

fn file_event(agent_id: &str, relative: &str, offset_secs: i64) -> MonitorEvent {
    MonitorEvent::FileChange(FileChangeEvent {
        kind: FileChangeKind::Change,
        absolute_path: Path::new("/work").join(relative),
        relative_path: relative.to_string(),
        agent_id: agent_id.to_string(),
        timestamp: Utc::now() + ChronoDuration::seconds(offset_secs),
    })
}

struct Fixture {
    git: Arc<MockGit>,
    registry: AgentRegistry,
    metrics: MetricsAggregator,
}

impl Fixture {
    fn new() -> Self {
        let git = MockGit::new();
        let registry = AgentRegistry::new(git.clone(), EventBus::new(), WatchOptions::default());
        let metrics = MetricsAggregator::new(
            registry.clone(),
            git.clone(),
            Arc::new(ActivityLog::new(100)),
            WatchOptions::default().ignored,
        );
        Self {
            git,
            registry,
            metrics,
        }
    }
}

fn populate(root: &Path) {
    fs::create_dir_all(root.join("src/nested")).unwrap();
    fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join("README.md"), "readme").unwrap();
    fs::write(root.join("src/main.ts"), "main").unwrap();
    fs::write(root.join("src/nested/util.ts"), "util").unwrap();
    fs::write(root.join("node_modules/pkg/index.js"), "ignored").unwrap();
    fs::write(root.join(".git/HEAD"), "ignored").unwrap();
}

mod agent_metrics {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn counts_files_commits_and_diff_since_baseline() {
        let fx = Fixture::new();
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        fx.git.push_commit(dir.path(), "base");
        fx.registry.add_agent("a1", "a1", dir.path()).await.unwrap();
        fx.git.push_commit(dir.path(), "c1");
        fx.git.push_commit(dir.path(), "c2");
        fx.git.set_diff(
            dir.path(),
            DiffStats {
                files_changed: 4,
                lines_added: 30,
                lines_removed: 7,
            },
        );
        fx.metrics.record(&file_event("a1", "src/main.ts", 0));
        let latest = file_event("a1", "README.md", 60);
        fx.metrics.record(&latest);

        let m = fx.metrics.agent_metrics("a1").await.unwrap();

        assert_eq!(m.agent_id, "a1");
        assert_eq!(m.total_files, 3);
        assert_eq!(m.total_commits, 2);
        assert_eq!(m.files_changed, 4);
        assert_eq!(m.lines_added, 30);
        assert_eq!(m.lines_removed, 7);
        assert_eq!(m.last_activity, latest.timestamp());
        fx.registry.stop_all().await;
    }

    #[tokio::test]
    async fn unknown_agent_is_not_monitored() {
        let fx = Fixture::new();
        let err = fx.metrics.agent_metrics("ghost").await.unwrap_err();
        assert!(matches!(err, MonitorError::NotMonitored(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn git_failure_is_an_error() {
        let fx = Fixture::new();
        let dir = TempDir::new().unwrap();
        fx.git.push_commit(dir.path(), "base");
        fx.registry.add_agent("a1", "a1", dir.path()).await.unwrap();
        fx.git.set_failing(dir.path(), true);

        let err = fx.metrics.agent_metrics("a1").await.unwrap_err();

        assert!(matches!(err, MonitorError::Git(_)));
        fx.registry.stop_all().await;
    }
}

mod system_metrics {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn active_agents_counts_only_successful_agents() {
        let fx = Fixture::new();
        let dirs: Vec<TempDir> = (0..4).map(|_| TempDir::new().unwrap()).collect();
        for (i, dir) in dirs.iter().enumerate() {
            fs::write(dir.path().join("file.txt"), "x").unwrap();
            fx.git.push_commit(dir.path(), &format!("base{i}"));
            fx.registry
                .add_agent(&format!("a{i}"), "agent", dir.path())
                .await
                .unwrap();
        }
        fx.git.push_commit(dirs[0].path(), "new0");
        fx.git.set_failing(dirs[1].path(), true);
        fx.git.set_failing(dirs[3].path(), true);

        let snapshot = fx.metrics.system_metrics().await;

        assert_eq!(snapshot.total_agents, 4);
        assert_eq!(snapshot.active_agents, 2);
        assert_eq!(snapshot.total_files, 2);
        assert_eq!(snapshot.total_commits, 1);
        assert!(snapshot.active_agents <= snapshot.total_agents);
        fx.registry.stop_all().await;
    }

    #[tokio::test]
    async fn empty_registry_gives_empty_snapshot() {
        let fx = Fixture::new();
        let snapshot = fx.metrics.system_metrics().await;
        assert_eq!(snapshot.total_agents, 0);
        assert_eq!(snapshot.active_agents, 0);
        assert!(snapshot.recent_activity.is_empty());
    }

    #[tokio::test]
    async fn recent_activity_keeps_last_hundred_in_order() {
        let fx = Fixture::new();
        for i in 0..150 {
            fx.metrics.record(&file_event("a1", &format!("f{i}.ts"), 0));
        }

        let recent = fx.metrics.system_metrics().await.recent_activity;

        assert_eq!(recent.len(), 100);
        let paths: Vec<String> = recent
            .iter()
            .map(|e| match e {
                MonitorEvent::FileChange(f) => f.relative_path.clone(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        let expected: Vec<String> = (50..150).map(|i| format!("f{i}.ts")).collect();
        assert_eq!(paths, expected);
    }

    #[tokio::test]
    async fn errors_are_not_recorded_as_activity() {
        let fx = Fixture::new();
        fx.metrics
            .record(&MonitorEvent::error(Some("a1"), "git polling", "boom"));
        assert!(fx.metrics.activity().recent().is_empty());
        assert_eq!(fx.metrics.activity().last_activity("a1"), None);
    }
}
