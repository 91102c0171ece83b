//! Keyword heuristics over raw feedback, for reporting.
//!
//! Reconciliation never uses this; the stored result relies only on the
//! explicit markers.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    Failure,
    Pending,
    Unknown,
}

impl ActionStatus {
    pub fn label(self) -> &'static str {
        match self {
            ActionStatus::Success => "SUCCESS",
            ActionStatus::Failure => "FAILURE",
            ActionStatus::Pending => "PENDING",
            ActionStatus::Unknown => "UNKNOWN",
        }
    }

    /// First matching rule wins, checked in the order success, failure, pending.
    pub fn infer(feedback: &str) -> Self {
        for (status, re) in rules() {
            if re.is_match(feedback) {
                return *status;
            }
        }
        ActionStatus::Unknown
    }
}

fn rules() -> &'static [(ActionStatus, Regex)] {
    static RULES: OnceLock<Vec<(ActionStatus, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        let patterns = [
            (
                ActionStatus::Success,
                r"\[SUCCESS\]|(?i:completed|success|succeeded|thành công|hoàn thành)",
            ),
            (
                ActionStatus::Failure,
                r"\[FAILURE\]|(?i:fail|error|exception|cannot|can't|blocked|không thành công|thất bại)",
            ),
            (
                ActionStatus::Pending,
                r"\[PENDING\]|(?i:in progress|pending|waiting|đang xử lý|chờ)",
            ),
        ];
        patterns
            .into_iter()
            .filter_map(|(status, pattern)| match Regex::new(pattern) {
                Ok(re) => Some((status, re)),
                Err(e) => {
                    tracing::error!("Invalid status pattern for {}: {}", status.label(), e);
                    None
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_markers_and_keywords() {
        assert_eq!(ActionStatus::infer("[SUCCESS] door opened"), ActionStatus::Success);
        assert_eq!(ActionStatus::infer("Task Completed."), ActionStatus::Success);
        assert_eq!(ActionStatus::infer("[FAILURE] locked"), ActionStatus::Failure);
        assert_eq!(ActionStatus::infer("Path BLOCKED by rocks"), ActionStatus::Failure);
        assert_eq!(ActionStatus::infer("You can't go there"), ActionStatus::Failure);
        assert_eq!(ActionStatus::infer("still waiting on reply"), ActionStatus::Pending);
        assert_eq!(ActionStatus::infer("You see a tree."), ActionStatus::Unknown);
        assert_eq!(ActionStatus::infer(""), ActionStatus::Unknown);
    }

    #[test]
    fn vietnamese_keywords_from_older_logs() {
        assert_eq!(ActionStatus::infer("nhiệm vụ hoàn thành"), ActionStatus::Success);
        assert_eq!(ActionStatus::infer("di chuyển thất bại"), ActionStatus::Failure);
        assert_eq!(ActionStatus::infer("đang xử lý yêu cầu"), ActionStatus::Pending);
        // "không thành công" also contains the success phrase, which wins.
        assert_eq!(ActionStatus::infer("không thành công"), ActionStatus::Success);
    }

    #[test]
    fn success_rule_is_checked_before_failure() {
        assert_eq!(
            ActionStatus::infer("[SUCCESS] recovered after an error"),
            ActionStatus::Success
        );
    }
}
