pub mod reconcile;
pub mod status;
pub mod working_set;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PENDING_RESULT: &str = "pending";
pub const SUCCESS_RESULT: &str = "SUCCESS";
pub const FAILURE_RESULT: &str = "FAILURE";

/// Outcome classification of one committed action.
///
/// Feedback that matches neither marker is kept verbatim as `Text` so nothing
/// the environment said is thrown away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    Pending,
    Success,
    Failure,
    Text(String),
}

impl ActionResult {
    pub fn as_db_str(&self) -> &str {
        match self {
            ActionResult::Pending => PENDING_RESULT,
            ActionResult::Success => SUCCESS_RESULT,
            ActionResult::Failure => FAILURE_RESULT,
            ActionResult::Text(text) => text,
        }
    }

    /// Empty or missing results come from rows written before the column
    /// existed and are read as pending.
    pub fn from_db(raw: &str) -> Self {
        match raw.trim() {
            "" | PENDING_RESULT => ActionResult::Pending,
            SUCCESS_RESULT => ActionResult::Success,
            FAILURE_RESULT => ActionResult::Failure,
            _ => ActionResult::Text(raw.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ActionResult::Pending)
    }
}

impl std::fmt::Display for ActionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A persisted action row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub id: i64,
    pub quest: String,
    pub action: String,
    pub direction: Option<String>,
    pub arguments: Map<String, Value>,
    pub result: ActionResult,
    pub feedback: String,
    pub reflection: String,
    pub timestamp: DateTime<Utc>,
}

impl ActionEntry {
    /// Text the working set holds for this action.
    pub fn display_text(&self) -> String {
        format_action_text(&self.action, &self.arguments)
    }

    pub fn history_line(&self) -> String {
        let direction = match self.direction.as_deref() {
            Some(direction) if !direction.is_empty() => format!(" ({})", direction),
            _ => String::new(),
        };
        format!(
            "#{}: {}{}, Result: {}, Feedback: {}",
            self.id, self.action, direction, self.result, self.feedback
        )
    }
}

/// An action about to be appended to the durable log.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub quest: String,
    pub action: String,
    pub direction: Option<String>,
    pub arguments: Map<String, Value>,
    pub result: ActionResult,
    pub feedback: String,
    pub reflection: String,
    pub timestamp: DateTime<Utc>,
}

impl NewAction {
    /// A freshly chosen action: pending, no feedback yet.
    pub fn pending(quest: &str, action: &str, arguments: &Map<String, Value>) -> Self {
        Self {
            quest: quest.to_string(),
            action: action.trim().to_string(),
            direction: direction_argument(arguments),
            arguments: arguments.clone(),
            result: ActionResult::Pending,
            feedback: String::new(),
            reflection: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_reflection(mut self, reflection: impl Into<String>) -> Self {
        self.reflection = reflection.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionEntry {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryState {
    Unknown,
    Available,
    Full,
}

impl InventoryState {
    pub fn as_db_str(self) -> &'static str {
        match self {
            InventoryState::Unknown => "unknown",
            InventoryState::Available => "available",
            InventoryState::Full => "full",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" => InventoryState::Full,
            "available" => InventoryState::Available,
            _ => InventoryState::Unknown,
        }
    }

    pub fn is_full(self) -> bool {
        self == InventoryState::Full
    }
}

/// `name, key: value, ...` with string values unquoted.
pub fn format_action_text(name: &str, arguments: &Map<String, Value>) -> String {
    let mut text = name.trim().to_string();
    for (key, value) in arguments {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text.push_str(&format!(", {}: {}", key, rendered));
    }
    text
}

fn direction_argument(arguments: &Map<String, Value>) -> Option<String> {
    arguments
        .get("direction")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}
