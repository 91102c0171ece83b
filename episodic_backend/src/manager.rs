//! The agent's single entry point into episodic memory.
//!
//! `MemoryManager` owns the durable log handle and the working set for the
//! lifetime of the process. All calls are serialized behind one lock. Storage
//! problems never reach the caller: they are logged and the manager carries on
//! with whatever it still has (cache only, or log only).

use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::config::MemoryConfig;
use crate::database::EpisodeDatabase;
use crate::memory::reconcile::{
    FeedbackClassifier, PendingStore, Persisted, ReconcileReport, Reconciler,
};
use crate::memory::working_set::WorkingSet;
use crate::memory::{format_action_text, ActionEntry, InventoryState, NewAction};
use crate::observation::{InventoryItem, Observation};

/// What committing a chosen action produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub action_text: String,
    /// Log row id; `None` when the row could not be written.
    pub row_id: Option<i64>,
}

struct MemoryState {
    cache: WorkingSet,
    log: Option<EpisodeDatabase>,
    quest: String,
    /// Quest of the newest committed action, which its feedback resolves under.
    action_quest: Option<String>,
    /// The newest committed action has no log row, so its feedback must not
    /// resolve an older pending one.
    action_unlogged: bool,
    /// Reflection produced since the last committed action.
    turn_reflection: Option<String>,
    inventory: Option<InventoryState>,
}

pub struct MemoryManager {
    state: Mutex<MemoryState>,
    reconciler: Reconciler,
    history_limit: usize,
    blocked_directions_limit: usize,
}

impl MemoryManager {
    /// Open the configured log and warm the working set from it. If the log
    /// cannot be opened the manager runs cache-only.
    pub fn open(config: &MemoryConfig) -> Self {
        let log = match EpisodeDatabase::new(&config.database_path) {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::warn!(
                    "Episode database unavailable at '{}', running cache-only: {:#}",
                    config.database_path,
                    e
                );
                None
            }
        };
        Self::build(config, log)
    }

    pub fn with_database(config: &MemoryConfig, db: EpisodeDatabase) -> Self {
        Self::build(config, Some(db))
    }

    /// A manager without durable storage.
    pub fn in_memory(config: &MemoryConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: &MemoryConfig, log: Option<EpisodeDatabase>) -> Self {
        let log = log.map(|db| db.with_blocked_pattern(config.blocked_pattern.clone()));
        let mut state = MemoryState {
            cache: WorkingSet::new(config.action_window, config.reflection_window),
            log,
            quest: String::new(),
            action_quest: None,
            action_unlogged: false,
            turn_reflection: None,
            inventory: None,
        };

        if let Some(log) = &state.log {
            match rebuild_working_set(&mut state.cache, log) {
                Ok(last_quest) => {
                    tracing::info!(
                        "Restored working set: {} action entries, {} reflections",
                        state.cache.action_count(),
                        state.cache.reflection_count()
                    );
                    if let Some(quest) = last_quest {
                        state.quest = quest.clone();
                        state.action_quest = Some(quest);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to restore working set from log: {:#}", e);
                }
            }
        }

        Self {
            state: Mutex::new(state),
            reconciler: Reconciler::new(FeedbackClassifier::from_config(config)),
            history_limit: config.history_limit,
            blocked_directions_limit: config.blocked_directions_limit,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Memory state lock poisoned, continuing with last state");
            poisoned.into_inner()
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.lock_state().log.is_some()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn set_quest(&self, quest: &str) {
        switch_quest(&mut self.lock_state(), quest);
    }

    pub fn current_quest(&self) -> String {
        self.lock_state().quest.clone()
    }

    // ========================================================================
    // Turn mutations
    // ========================================================================

    /// Handle one turn boundary: reconcile the previous action's feedback,
    /// then adopt the observation's quest and inventory.
    pub fn on_observation(&self, observation: &Observation) -> ReconcileReport {
        let mut state = self.lock_state();
        let report = self.reconcile_locked(&mut state, &observation.joined_feedback());

        switch_quest(&mut state, observation.current_quest());
        record_inventory(&mut state, &observation.items);
        report
    }

    /// Attach feedback for the previous action to log and cache.
    pub fn on_feedback(&self, raw_feedback: &str) -> ReconcileReport {
        let mut state = self.lock_state();
        self.reconcile_locked(&mut state, raw_feedback)
    }

    fn reconcile_locked(&self, state: &mut MemoryState, raw_feedback: &str) -> ReconcileReport {
        let quest = state
            .action_quest
            .clone()
            .unwrap_or_else(|| state.quest.clone());
        let MemoryState {
            cache,
            log,
            action_unlogged,
            ..
        } = state;
        if *action_unlogged && log.is_some() {
            let mut report = self.reconciler.reconcile(cache, None, &quest, raw_feedback);
            if report.persisted == Persisted::Unavailable {
                tracing::warn!("Feedback for an unlogged action kept in the working set only");
                report.persisted = Persisted::Unlogged;
            }
            return report;
        }
        let store = log.as_ref().map(|db| db as &dyn PendingStore);
        self.reconciler.reconcile(cache, store, &quest, raw_feedback)
    }

    /// Commit a chosen action as pending. Its feedback comes next turn.
    pub fn on_action_chosen(&self, name: &str, arguments: &Map<String, Value>) -> CommitOutcome {
        let action_text = format_action_text(name, arguments);
        let now = Utc::now();

        let mut state = self.lock_state();
        state.cache.push_action(&action_text, now);

        let quest = state.quest.clone();
        let reflection = state.turn_reflection.take().unwrap_or_default();
        let mut action = NewAction::pending(&quest, name, arguments).with_reflection(reflection);
        action.timestamp = now;

        let row_id = match &state.log {
            Some(log) => match log.append_action(&action) {
                Ok(id) => {
                    tracing::info!("Logged new action #{}: {}", id, action_text);
                    Some(id)
                }
                Err(e) => {
                    tracing::error!("Failed to log action '{}': {:#}", action_text, e);
                    None
                }
            },
            None => None,
        };
        state.action_quest = Some(quest);
        state.action_unlogged = row_id.is_none();

        CommitOutcome {
            action_text,
            row_id,
        }
    }

    pub fn on_reflection_produced(&self, content: &str) -> Option<i64> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let now = Utc::now();

        let mut state = self.lock_state();
        state.cache.push_reflection(content, now);
        state.turn_reflection = Some(content.to_string());

        match &state.log {
            Some(log) => match log.append_reflection(content, now) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::error!("Failed to log reflection: {:#}", e);
                    None
                }
            },
            None => None,
        }
    }

    // ========================================================================
    // Planner queries
    // ========================================================================

    /// Newest-first history, one complete line per action. Reads the log and
    /// falls back to the working set when the log is missing or failing.
    pub fn recent_history_text(&self, quest: &str, limit: usize) -> String {
        let state = self.lock_state();
        if let Some(log) = &state.log {
            match log.recent_actions(quest, limit) {
                Ok(rows) => {
                    let mut text = String::new();
                    for row in &rows {
                        text.push_str(&row.history_line());
                        text.push('\n');
                    }
                    return text;
                }
                Err(e) => {
                    tracing::warn!("Falling back to working set for history: {:#}", e);
                }
            }
        }
        state.cache.render_actions(limit)
    }

    /// The working set rendered newest first, with repeat counts.
    pub fn working_set_text(&self, limit: usize) -> String {
        self.lock_state().cache.render_actions(limit)
    }

    pub fn recent_actions(&self, quest: &str, limit: usize) -> Vec<ActionEntry> {
        let state = self.lock_state();
        let Some(log) = &state.log else {
            return Vec::new();
        };
        log.recent_actions(quest, limit).unwrap_or_else(|e| {
            tracing::warn!("Failed to read recent actions: {:#}", e);
            Vec::new()
        })
    }

    pub fn blocked_directions(&self, quest: &str) -> Vec<String> {
        let state = self.lock_state();
        let Some(log) = &state.log else {
            return Vec::new();
        };
        log.blocked_directions(quest, self.blocked_directions_limit)
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to read blocked directions: {:#}", e);
                Vec::new()
            })
    }

    /// Inventory as of the last observation with items. Before any such
    /// observation in this process, the last persisted record decides.
    pub fn inventory_state(&self) -> InventoryState {
        let state = self.lock_state();
        if let Some(observed) = state.inventory {
            return observed;
        }
        match &state.log {
            Some(log) => log.inventory_state().unwrap_or_else(|e| {
                tracing::warn!("Failed to read inventory state: {:#}", e);
                InventoryState::Unknown
            }),
            None => InventoryState::Unknown,
        }
    }

    pub fn latest_reflection(&self) -> Option<String> {
        self.lock_state()
            .cache
            .latest_reflection()
            .map(|r| r.content.clone())
    }

    pub fn action_entries(&self) -> usize {
        self.lock_state().cache.action_count()
    }

    /// Run `f` against the working set.
    pub fn with_working_set<T>(&self, f: impl FnOnce(&WorkingSet) -> T) -> T {
        f(&self.lock_state().cache)
    }

    /// Release the log handle, reporting close errors.
    pub fn shutdown(self) -> Result<()> {
        let state = self
            .state
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match state.log {
            Some(log) => log.close(),
            None => Ok(()),
        }
    }
}

/// Replay the newest rows in creation order so eviction and merging end up
/// exactly where live operation left them. Returns the newest row's quest.
fn rebuild_working_set(cache: &mut WorkingSet, log: &EpisodeDatabase) -> Result<Option<String>> {
    for reflection in log.recent_reflections_chronological(cache.reflection_capacity())? {
        cache.push_reflection(&reflection.content, reflection.created_at);
    }

    let rows = log.recent_actions_chronological(cache.action_capacity())?;
    let last_quest = rows.last().map(|row| row.quest.clone());
    for row in &rows {
        cache.push_action(&row.display_text(), row.timestamp);
        if row.result.is_pending() {
            continue;
        }
        let feedback = if row.feedback.trim().is_empty() {
            row.result.as_db_str()
        } else {
            row.feedback.as_str()
        };
        cache.attach_feedback(feedback);
    }
    Ok(last_quest)
}

fn switch_quest(state: &mut MemoryState, quest: &str) {
    if state.quest != quest {
        tracing::debug!("Quest changed: '{}' -> '{}'", state.quest, quest);
        state.quest = quest.to_string();
    }
}

fn record_inventory(state: &mut MemoryState, items: &[InventoryItem]) {
    if items.is_empty() {
        return;
    }
    let mut observed = InventoryState::Available;
    for item in items {
        let status = if item.is_full {
            observed = InventoryState::Full;
            InventoryState::Full
        } else {
            InventoryState::Available
        };
        if let Some(log) = &state.log {
            if let Err(e) = log.record_inventory(&item.name, status) {
                tracing::warn!("Failed to log inventory item '{}': {:#}", item.name, e);
            }
        }
    }
    state.inventory = Some(observed);
}
