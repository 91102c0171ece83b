//! Bounded recency windows the planner reads every turn.
//!
//! Actions are pushed open (no feedback) the moment they are chosen. The
//! feedback only shows up with the next observation, and is attached to the
//! tail entry then. Identical consecutive `(action, feedback)` pairs fold into
//! one entry with a repeat count so repetitive behavior does not grow the prompt.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLog {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub feedback: String,
    pub repeat_times: u32,
}

impl ActionLog {
    pub fn is_resolved(&self) -> bool {
        !self.feedback.is_empty()
    }

    fn render(&self) -> String {
        let feedback = if self.is_resolved() {
            self.feedback.as_str()
        } else {
            "(awaiting feedback)"
        };
        let mut line = format!(
            "[{}] {} => {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.action,
            feedback
        );
        if self.repeat_times > 1 {
            line.push_str(&format!(" (repeated {} times)", self.repeat_times));
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionLog {
    pub created_at: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Window is empty, e.g. the previous action was lost with a restart.
    NoOpenEntry,
    /// Tail already carries feedback; a repeated delivery.
    AlreadyResolved,
    /// Nothing to attach after trimming.
    EmptyFeedback,
    Attached,
    Merged { repeat_times: u32 },
}

impl AttachOutcome {
    pub fn changed_cache(self) -> bool {
        matches!(self, AttachOutcome::Attached | AttachOutcome::Merged { .. })
    }
}

#[derive(Debug, Clone)]
pub struct WorkingSet {
    actions: VecDeque<ActionLog>,
    reflections: VecDeque<ReflectionLog>,
    action_capacity: usize,
    reflection_capacity: usize,
}

impl WorkingSet {
    pub fn new(action_capacity: usize, reflection_capacity: usize) -> Self {
        let action_capacity = action_capacity.max(1);
        let reflection_capacity = reflection_capacity.max(1);
        Self {
            actions: VecDeque::with_capacity(action_capacity),
            reflections: VecDeque::with_capacity(reflection_capacity),
            action_capacity,
            reflection_capacity,
        }
    }

    pub fn action_capacity(&self) -> usize {
        self.action_capacity
    }

    pub fn reflection_capacity(&self) -> usize {
        self.reflection_capacity
    }

    pub fn push_action(&mut self, action: &str, timestamp: DateTime<Utc>) {
        if self.actions.len() >= self.action_capacity {
            self.actions.pop_front();
        }
        self.actions.push_back(ActionLog {
            timestamp,
            action: action.trim().to_string(),
            feedback: String::new(),
            repeat_times: 1,
        });
    }

    pub fn push_reflection(&mut self, content: &str, created_at: DateTime<Utc>) {
        if self.reflections.len() >= self.reflection_capacity {
            self.reflections.pop_front();
        }
        self.reflections.push_back(ReflectionLog {
            created_at,
            content: content.to_string(),
        });
    }

    pub fn attach_feedback(&mut self, feedback: &str) -> AttachOutcome {
        let feedback = feedback.trim();
        let Some(last) = self.actions.back_mut() else {
            return AttachOutcome::NoOpenEntry;
        };
        if last.is_resolved() {
            return AttachOutcome::AlreadyResolved;
        }
        if feedback.is_empty() {
            return AttachOutcome::EmptyFeedback;
        }
        last.feedback = feedback.to_string();

        let len = self.actions.len();
        if len < 2 {
            return AttachOutcome::Attached;
        }
        let same_as_previous = {
            let previous = &self.actions[len - 2];
            let last = &self.actions[len - 1];
            previous.action == last.action && previous.feedback == last.feedback
        };
        if !same_as_previous {
            return AttachOutcome::Attached;
        }

        let last_timestamp = self.actions[len - 1].timestamp;
        self.actions.pop_back();
        let previous = &mut self.actions[len - 2];
        previous.timestamp = last_timestamp;
        previous.repeat_times += 1;
        AttachOutcome::Merged {
            repeat_times: previous.repeat_times,
        }
    }

    /// The tail is the only entry that can still receive feedback.
    pub fn has_open_action(&self) -> bool {
        self.actions.back().is_some_and(|a| !a.is_resolved())
    }

    pub fn has_resolved_tail(&self) -> bool {
        self.actions.back().is_some_and(ActionLog::is_resolved)
    }

    pub fn latest_action(&self) -> Option<&ActionLog> {
        self.actions.back()
    }

    pub fn latest_reflection(&self) -> Option<&ReflectionLog> {
        self.reflections.back()
    }

    pub fn actions_newest_first(&self) -> impl Iterator<Item = &ActionLog> {
        self.actions.iter().rev()
    }

    pub fn reflections_newest_first(&self) -> impl Iterator<Item = &ReflectionLog> {
        self.reflections.iter().rev()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn reflection_count(&self) -> usize {
        self.reflections.len()
    }

    /// Newest-first lines, one per (possibly merged) entry.
    pub fn render_actions(&self, limit: usize) -> String {
        let mut text = String::new();
        for log in self.actions_newest_first().take(limit) {
            text.push_str(&log.render());
            text.push('\n');
        }
        text
    }
}
