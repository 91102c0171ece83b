//! Attaching delayed feedback to the action that produced it.
//!
//! An action is committed as `pending` in the turn it is chosen. Its feedback
//! arrives with the next observation and resolves, in order:
//!
//! 1. the most recent pending row for the quest in the durable log,
//! 2. the open tail of the working set.
//!
//! Storage failures are logged and reported, never propagated: the decision
//! loop keeps running on the cache alone.

use anyhow::Result;

use super::working_set::{AttachOutcome, WorkingSet};
use super::ActionResult;
use crate::config::MemoryConfig;

/// Result of resolving a pending row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Updated { id: i64, action: String },
    NothingPending,
}

/// Durable side of reconciliation.
pub trait PendingStore {
    fn update_pending_result(
        &self,
        quest: &str,
        result: &ActionResult,
        feedback: &str,
    ) -> Result<Reconciled>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    Updated { id: i64 },
    NothingPending,
    /// No store attached (cache-only mode).
    Unavailable,
    /// The action being resolved never reached the store.
    Unlogged,
    /// Reconciliation was not attempted.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub result: Option<ActionResult>,
    pub persisted: Persisted,
    pub cache: AttachOutcome,
}

impl ReconcileReport {
    fn skipped(cache: AttachOutcome) -> Self {
        Self {
            result: None,
            persisted: Persisted::Skipped,
            cache,
        }
    }

    /// True when neither store was touched.
    pub fn is_no_op(&self) -> bool {
        !self.cache.changed_cache() && !matches!(self.persisted, Persisted::Updated { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackClassifier {
    success_marker: String,
    failure_marker: String,
}

impl Default for FeedbackClassifier {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

impl FeedbackClassifier {
    pub fn new(success_marker: impl Into<String>, failure_marker: impl Into<String>) -> Self {
        Self {
            success_marker: success_marker.into(),
            failure_marker: failure_marker.into(),
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.success_marker.clone(), config.failure_marker.clone())
    }

    pub fn classify(&self, feedback: &str) -> ActionResult {
        if !self.success_marker.is_empty() && feedback.contains(&self.success_marker) {
            ActionResult::Success
        } else if !self.failure_marker.is_empty() && feedback.contains(&self.failure_marker) {
            ActionResult::Failure
        } else {
            ActionResult::Text(feedback.to_string())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    classifier: FeedbackClassifier,
}

impl Reconciler {
    pub fn new(classifier: FeedbackClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &FeedbackClassifier {
        &self.classifier
    }

    pub fn reconcile(
        &self,
        cache: &mut WorkingSet,
        store: Option<&dyn PendingStore>,
        quest: &str,
        raw_feedback: &str,
    ) -> ReconcileReport {
        let feedback = raw_feedback.trim();
        if feedback.is_empty() {
            tracing::debug!("No feedback delivered this turn");
            return ReconcileReport::skipped(AttachOutcome::EmptyFeedback);
        }

        // A resolved tail means this feedback was already applied. Touching the
        // log now could resolve an older, stale pending row instead.
        if cache.has_resolved_tail() {
            tracing::debug!("Ignoring repeated feedback delivery for quest '{}'", quest);
            return ReconcileReport::skipped(AttachOutcome::AlreadyResolved);
        }

        let result = self.classifier.classify(feedback);
        let persisted = match store {
            None => Persisted::Unavailable,
            Some(store) => match store.update_pending_result(quest, &result, feedback) {
                Ok(Reconciled::Updated { id, action }) => {
                    tracing::info!(
                        "Resolved pending action #{} ({}) for quest '{}' with result: {}",
                        id,
                        action,
                        quest,
                        result
                    );
                    Persisted::Updated { id }
                }
                Ok(Reconciled::NothingPending) => {
                    tracing::warn!("No pending action found for quest '{}'", quest);
                    Persisted::NothingPending
                }
                Err(e) => {
                    tracing::error!("Failed to record feedback for quest '{}': {:#}", quest, e);
                    Persisted::Failed(format!("{:#}", e))
                }
            },
        };

        let cache_outcome = cache.attach_feedback(feedback);
        tracing::debug!("Working set feedback outcome: {:?}", cache_outcome);

        ReconcileReport {
            result: Some(result),
            persisted,
            cache: cache_outcome,
        }
    }
}
