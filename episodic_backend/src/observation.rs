//! What the environment hands the agent each turn.
//!
//! Every field is optional on the wire. Missing fields fall back to empty
//! values so a sparse observation never fails to parse.

use serde::{Deserialize, Serialize};

/// Separator used when joining feedback lines into one text.
pub const FEEDBACK_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    /// Feedback for the previous turn's action, one line per message.
    #[serde(default)]
    pub action_log: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub items: Vec<InventoryItem>,
    #[serde(default)]
    pub lidar: Option<String>,
    #[serde(default)]
    pub odometry: Option<String>,
    #[serde(default)]
    pub perception: Option<String>,
}

/// Tasks arrive either as bare strings or as objects carrying a description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Task {
    Plain(String),
    Described {
        #[serde(default)]
        description: String,
    },
}

impl Task {
    pub fn description(&self) -> &str {
        match self {
            Task::Plain(text) => text,
            Task::Described { description } => description,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_full: bool,
}

impl Observation {
    /// The first task's description; the global quest `""` without tasks.
    pub fn current_quest(&self) -> &str {
        self.tasks.first().map(Task::description).unwrap_or("")
    }

    pub fn joined_feedback(&self) -> String {
        self.action_log.join(FEEDBACK_SEPARATOR)
    }

    pub fn inventory_full(&self) -> bool {
        self.items.iter().any(|item| item.is_full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let observation: Observation = serde_json::from_str("{}").unwrap();
        assert!(observation.action_log.is_empty());
        assert_eq!(observation.current_quest(), "");
        assert_eq!(observation.joined_feedback(), "");
        assert!(!observation.inventory_full());
        assert!(observation.lidar.is_none());
    }

    #[test]
    fn tasks_accept_strings_and_objects() {
        let observation: Observation = serde_json::from_str(
            r#"{"tasks": [{"description": "Find the lost key", "status": "active"}, "Return home"]}"#,
        )
        .unwrap();
        assert_eq!(observation.current_quest(), "Find the lost key");
        assert_eq!(observation.tasks[1].description(), "Return home");
    }

    #[test]
    fn feedback_and_items_are_read() {
        let observation: Observation = serde_json::from_str(
            r#"{
                "action_log": ["[SUCCESS] moved north", "You see a door"],
                "items": [{"name": "Copper Ore", "count": 3}, {"name": "Bag", "is_full": true}]
            }"#,
        )
        .unwrap();
        assert_eq!(
            observation.joined_feedback(),
            "[SUCCESS] moved north\n\nYou see a door"
        );
        assert_eq!(observation.items[0].count, Some(3));
        assert_eq!(observation.items[0].description, "");
        assert!(observation.inventory_full());
    }
}
