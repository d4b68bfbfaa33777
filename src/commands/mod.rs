//! Command processing against the shared task board.
//!
//! Every call re-reads the board; nothing is cached between commands.
//! Failures never escape `process_command`: they come back as a response
//! with `success: false`.

pub mod board;
pub mod classify;

pub use board::{BoardStore, FileBoardStore, Task, TaskBoard, TaskBoardRepository, TaskStatus};
pub use classify::{classify, CommandKind};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub input: String,
    pub timestamp: DateTime<Utc>,
}

impl Command {
    pub fn new(input: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: classify(input),
            input: input.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            executed_by: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            executed_by: None,
        }
    }
}

/// Audit record published after each successful mutating command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandProcessed {
    pub command: Command,
    pub response: CommandResponse,
}

pub const HELP_TEXT: &str = "Available commands:
  status       - show system status (\"show system status\")
  create task  - add a task to the board (\"create a task: <title>\")
  list agents  - list agents on the task board (\"list agents\")
  @<agent>     - route a command to one agent (\"@frontend status\")
  help         - show this message";

pub struct CommandProcessor {
    board: Arc<TaskBoardRepository>,
    events: broadcast::Sender<CommandProcessed>,
}

impl CommandProcessor {
    pub fn new(board: Arc<TaskBoardRepository>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { board, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommandProcessed> {
        self.events.subscribe()
    }

    pub async fn process_command(&self, input: &str) -> CommandResponse {
        let command = Command::new(input);
        if let CommandKind::RouteToAgent { agent, command } = &command.kind {
            return self.route_to_agent(command, agent).await;
        }
        self.run(command, None).await
    }

    /// Process `input` on behalf of `agent_name`; the response carries `executedBy`.
    pub async fn route_to_agent(&self, input: &str, agent_name: &str) -> CommandResponse {
        tracing::debug!(agent = agent_name, input, "Routing command to agent");
        self.run(Command::new(input), Some(agent_name)).await
    }

    async fn run(&self, command: Command, agent: Option<&str>) -> CommandResponse {
        let mut response = match self.execute(&command).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(input = %command.input, "Command failed: {e:#}");
                CommandResponse::failure(format!("Error processing command: {e:#}"))
            }
        };
        response.executed_by = agent.map(str::to_string);

        if response.success && command.kind.is_mutating() {
            let _ = self.events.send(CommandProcessed {
                command,
                response: response.clone(),
            });
        }
        response
    }

    async fn execute(&self, command: &Command) -> Result<CommandResponse> {
        match &command.kind {
            CommandKind::StatusQuery => {
                let board = self.board.load().await?;
                let total = board.tasks.len();
                let active = board.count_with_status(TaskStatus::InProgress);
                let completed = board.count_with_status(TaskStatus::Done);
                Ok(CommandResponse::ok(
                    format!("System status: {total} tasks, {active} in progress, {completed} completed"),
                    Some(json!({
                        "totalTasks": total,
                        "activeTasks": active,
                        "completedTasks": completed,
                    })),
                ))
            }
            CommandKind::TaskCreate { title } => {
                if title.is_empty() {
                    return Ok(CommandResponse::failure("Task title is required"));
                }
                let title = title.to_string();
                let task = self
                    .board
                    .update(move |board| {
                        let task = Task::new(new_task_id(), title);
                        board.tasks.push(task.clone());
                        Ok(task)
                    })
                    .await?;
                Ok(CommandResponse::ok(
                    format!("Created task {}: {}", task.id, task.title),
                    Some(serde_json::to_value(&task)?),
                ))
            }
            CommandKind::AgentList => {
                let board = self.board.load().await?;
                let agents: Vec<serde_json::Value> = board
                    .agents
                    .iter()
                    .map(|(id, entry)| {
                        json!({
                            "id": id,
                            "name": entry.name,
                            "activeTasks": entry.active_tasks,
                            "completedTasks": entry.completed_tasks,
                        })
                    })
                    .collect();
                Ok(CommandResponse::ok(
                    format!("{} agents on the task board", agents.len()),
                    Some(serde_json::Value::Array(agents)),
                ))
            }
            CommandKind::Help => Ok(CommandResponse::ok(HELP_TEXT, None)),
            CommandKind::RouteToAgent { agent, .. } => Ok(CommandResponse::failure(format!(
                "Cannot route to {agent}: command is already routed"
            ))),
            CommandKind::Unknown => Ok(CommandResponse::failure(format!(
                "Unknown command: '{}'. Type 'help' for available commands.",
                command.input.trim()
            ))),
        }
    }
}

fn new_task_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("task-{}", &id[..8])
}
