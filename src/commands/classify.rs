//! Rule-based classification of free-text commands.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    StatusQuery,
    TaskCreate { title: String },
    AgentList,
    Help,
    RouteToAgent { agent: String, command: String },
    Unknown,
}

impl CommandKind {
    /// True for commands that rewrite the task board
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::TaskCreate { .. })
    }
}

static ROUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@([A-Za-z0-9_.\-]+)\s+(.+)$").expect("valid route regex"));

static CREATE_TASK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(?:please\s+)?(?:create|add|new)\s+(?:a\s+|new\s+)?task\b\s*:?\s*(.*)$")
        .expect("valid create regex")
});

pub fn classify(input: &str) -> CommandKind {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if let Some(caps) = ROUTE.captures(trimmed) {
        return CommandKind::RouteToAgent {
            agent: caps[1].to_string(),
            command: caps[2].trim().to_string(),
        };
    }

    if lower == "help" || lower == "?" || lower.starts_with("help ") {
        return CommandKind::Help;
    }

    if let Some(caps) = CREATE_TASK.captures(trimmed) {
        return CommandKind::TaskCreate {
            title: caps[1].trim().to_string(),
        };
    }

    if lower.contains("status") || lower.contains("progress") {
        return CommandKind::StatusQuery;
    }

    if lower.contains("agents") || (lower.contains("agent") && lower.contains("list")) {
        return CommandKind::AgentList;
    }

    CommandKind::Unknown
}
