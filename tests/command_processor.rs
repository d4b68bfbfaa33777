//! CommandProcessor against an in-memory and an on-disk task board

mod test_utils;

use agentwatch::commands::{CommandKind, CommandProcessor, TaskBoardRepository};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use test_utils::MemoryBoardStore;

fn processor(store: Arc<MemoryBoardStore>) -> CommandProcessor {
    CommandProcessor::new(Arc::new(TaskBoardRepository::new(store, "coordinator")))
}

fn board_with_statuses(statuses: &[&str]) -> serde_json::Value {
    let tasks: Vec<_> = statuses
        .iter()
        .enumerate()
        .map(|(i, status)| json!({"id": format!("t{i}"), "title": format!("Task {i}"), "status": status}))
        .collect();
    json!({"version": "1.0", "tasks": tasks, "agents": {}})
}

mod help {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn lists_command_categories() {
        let processor = processor(MemoryBoardStore::new());

        let response = processor.process_command("help").await;

        assert!(response.success);
        let categories = ["status", "create task", "list agents"];
        let named = categories
            .iter()
            .filter(|c| response.message.contains(*c))
            .count();
        assert!(named >= 2, "help text: {}", response.message);
    }
}

mod status_query {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn counts_total_active_and_completed() {
        let store = MemoryBoardStore::with_json(board_with_statuses(&[
            "DONE",
            "TODO",
            "IN_PROGRESS",
            "DONE",
            "VERIFIED",
            "DONE",
        ]));
        let processor = processor(store.clone());

        let response = processor.process_command("show system status").await;

        assert!(response.success);
        assert_eq!(
            response.data,
            Some(json!({"totalTasks": 6, "activeTasks": 1, "completedTasks": 3}))
        );
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn missing_board_reads_as_empty() {
        let processor = processor(MemoryBoardStore::new());
        let response = processor.process_command("status").await;
        assert_eq!(
            response.data,
            Some(json!({"totalTasks": 0, "activeTasks": 0, "completedTasks": 0}))
        );
    }

    #[tokio::test]
    async fn reads_fresh_board_on_every_call() {
        let store = MemoryBoardStore::new();
        let processor = processor(store.clone());
        processor.process_command("create a task: one").await;

        let response = processor.process_command("status").await;
        assert_eq!(response.data.unwrap()["totalTasks"], 1);
    }
}

mod task_create {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn creates_one_task_with_exact_title_in_one_write() {
        let store = MemoryBoardStore::with_json(board_with_statuses(&["DONE"]));
        let processor = processor(store.clone());

        let response = processor
            .process_command("create a task: Build the login page")
            .await;

        assert!(response.success, "{}", response.message);
        assert_eq!(store.writes(), 1);
        let board = store.json();
        let tasks = board["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 2);
        let created = &tasks[1];
        assert_eq!(created["title"], "Build the login page");
        assert_eq!(created["status"], "TODO");
        assert_eq!(response.data.as_ref().unwrap()["id"], created["id"]);
        assert!(created["id"].as_str().unwrap().starts_with("task-"));
        assert_eq!(board["updatedBy"], "coordinator");
        assert_eq!(board["metrics"]["totalTasks"], 2);
        assert_eq!(board["metrics"]["completedTasks"], 1);
    }

    #[tokio::test]
    async fn empty_title_fails_without_writing() {
        let store = MemoryBoardStore::new();
        let processor = processor(store.clone());

        let response = processor.process_command("create a task:   ").await;

        assert!(!response.success);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn concurrent_creates_keep_every_task() {
        let store = MemoryBoardStore::new();
        let processor = Arc::new(processor(store.clone()));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let processor = processor.clone();
                tokio::spawn(async move {
                    processor
                        .process_command(&format!("add task: job {i}"))
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().success);
        }

        let board = store.json();
        let mut titles: Vec<String> = board["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap().to_string())
            .collect();
        titles.sort();
        let mut expected: Vec<String> = (0..10).map(|i| format!("job {i}")).collect();
        expected.sort();
        assert_eq!(titles, expected);
        assert_eq!(store.writes(), 10);
    }

    #[tokio::test]
    async fn unknown_fields_survive_rewrite() {
        let store = MemoryBoardStore::with_json(json!({
            "version": "2.3",
            "project": "apollo",
            "tasks": [{"id": "t1", "title": "Old", "status": "IN_PROGRESS", "priority": "critical", "reviewer": "sam"}],
            "agents": {"a1": {"name": "frontend", "activeTasks": ["t1"], "completedTasks": [], "color": "blue"}}
        }));
        let processor = processor(store.clone());

        processor.process_command("new task: Fresh").await;

        let board = store.json();
        assert_eq!(board["version"], "2.3");
        assert_eq!(board["project"], "apollo");
        assert_eq!(board["tasks"][0]["priority"], "critical");
        assert_eq!(board["tasks"][0]["reviewer"], "sam");
        assert_eq!(board["agents"]["a1"]["color"], "blue");
    }
}

mod agent_list {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn enumerates_board_agents() {
        let store = MemoryBoardStore::with_json(json!({
            "tasks": [],
            "agents": {
                "a1": {"name": "frontend", "activeTasks": ["t1"], "completedTasks": ["t0"]},
                "a2": {"name": "backend", "activeTasks": [], "completedTasks": []}
            }
        }));
        let processor = processor(store);

        let response = processor.process_command("list agents").await;

        assert!(response.success);
        assert_eq!(
            response.data,
            Some(json!([
                {"id": "a1", "name": "frontend", "activeTasks": ["t1"], "completedTasks": ["t0"]},
                {"id": "a2", "name": "backend", "activeTasks": [], "completedTasks": []}
            ]))
        );
    }
}

mod failures {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn read_failure_becomes_unsuccessful_response() {
        let store = MemoryBoardStore::new();
        store.fail_reads(true);
        let processor = processor(store);

        let response = processor.process_command("status").await;

        assert!(!response.success);
        assert!(response.message.starts_with("Error processing command: "));
        assert!(response.message.contains("disk unavailable"));
    }

    #[tokio::test]
    async fn write_failure_becomes_unsuccessful_response() {
        let store = MemoryBoardStore::new();
        store.fail_writes(true);
        let processor = processor(store.clone());
        let mut events = processor.subscribe();

        let response = processor.process_command("create a task: Doomed").await;

        assert!(!response.success);
        assert!(response.message.contains("disk full"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn corrupt_board_is_reported_not_overwritten() {
        let store = MemoryBoardStore::new();
        use agentwatch::commands::BoardStore;
        store.write(b"{ not json").unwrap();
        let processor = processor(store.clone());

        let response = processor.process_command("create a task: x").await;

        assert!(!response.success);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn unknown_command_is_unsuccessful() {
        let processor = processor(MemoryBoardStore::new());
        let response = processor.process_command("make me a sandwich").await;
        assert!(!response.success);
        assert!(response.message.contains("help"));
    }
}

mod routing_and_audit {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn route_to_agent_stamps_executed_by() {
        let processor = processor(MemoryBoardStore::new());

        let response = processor.route_to_agent("status", "frontend").await;

        assert!(response.success);
        assert_eq!(response.executed_by.as_deref(), Some("frontend"));
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["executedBy"], "frontend");
    }

    #[tokio::test]
    async fn at_prefix_routes_to_named_agent() {
        let store = MemoryBoardStore::new();
        let processor = processor(store.clone());

        let response = processor.process_command("@backend create task: API").await;

        assert!(response.success);
        assert_eq!(response.executed_by.as_deref(), Some("backend"));
        assert_eq!(store.json()["tasks"][0]["title"], "API");
    }

    #[tokio::test]
    async fn plain_responses_omit_executed_by() {
        let processor = processor(MemoryBoardStore::new());
        let wire = serde_json::to_value(processor.process_command("help").await).unwrap();
        assert!(wire.get("executedBy").is_none());
    }

    #[tokio::test]
    async fn successful_mutations_emit_command_processed() {
        let processor = processor(MemoryBoardStore::new());
        let mut events = processor.subscribe();

        processor.process_command("status").await;
        let response = processor.process_command("create a task: Audit me").await;

        let event = events.try_recv().unwrap();
        assert_eq!(event.response, response);
        assert_eq!(event.command.input, "create a task: Audit me");
        assert_eq!(
            event.command.kind,
            CommandKind::TaskCreate {
                title: "Audit me".to_string()
            }
        );
        assert!(events.try_recv().is_err());
    }
}

mod file_board {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_board_file_and_reads_it_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".coordination").join("task-board.json");
        let processor = CommandProcessor::new(Arc::new(TaskBoardRepository::file(&path, "tester")));

        let created = processor.process_command("create a task: On disk").await;
        assert!(created.success, "{}", created.message);

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["tasks"][0]["title"], "On disk");
        assert_eq!(on_disk["updatedBy"], "tester");

        let status = processor.process_command("status").await;
        assert_eq!(status.data.unwrap()["totalTasks"], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_repositories_on_one_file_keep_every_task() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("task-board.json");

        // One repository per writer, as each CLI invocation builds its own
        let writers: Vec<_> = (0..20)
            .map(|i| {
                let path = path.clone();
                tokio::spawn(async move {
                    let repo = TaskBoardRepository::file(path, format!("agent-{i}"));
                    let processor = CommandProcessor::new(Arc::new(repo));
                    processor
                        .process_command(&format!("create a task: Job {i}"))
                        .await
                })
            })
            .collect();
        for writer in futures::future::join_all(writers).await {
            let response = writer.unwrap();
            assert!(response.success, "{}", response.message);
        }

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let mut titles: Vec<String> = on_disk["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap().to_string())
            .collect();
        titles.sort();
        let mut expected: Vec<String> = (0..20).map(|i| format!("Job {i}")).collect();
        expected.sort();
        assert_eq!(titles, expected);
        assert_eq!(on_disk["metrics"]["totalTasks"], 20);
    }
}
