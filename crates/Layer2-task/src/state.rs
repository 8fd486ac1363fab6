//! Task state machine
//!
//! ```text
//! Queued ──dispatch──▶ Running ──exit 0──▶ Completed
//!   │                     └────exit≠0───▶ Failed
//!   └──owner cancels──▶ Cancelled
//! ```

use serde::{Deserialize, Serialize};

/// Possible states of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task is waiting in the pending list
    Queued,

    /// Task has an instance and an external process
    Running,

    /// External tool exited with 0
    Completed,

    /// External tool failed, setup failed, or the process restarted mid-run
    Failed,

    /// Owner cancelled the task while it was queued
    Cancelled,
}

impl TaskState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Check if task is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running)
    }

    /// Whether `self → next` is an allowed transition
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Queued, TaskState::Running)
                | (TaskState::Queued, TaskState::Cancelled)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        )
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Get a symbol for the state (for CLI output)
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskState::Queued => "◎",
            TaskState::Running => "⟳",
            TaskState::Completed => "✓",
            TaskState::Failed => "✗",
            TaskState::Cancelled => "⊘",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        let all = [
            TaskState::Queued,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_no_return_to_queued() {
        assert!(!TaskState::Running.can_transition_to(TaskState::Queued));
        assert!(!TaskState::Running.can_transition_to(TaskState::Cancelled));
        assert!(TaskState::Queued.can_transition_to(TaskState::Cancelled));
        assert!(TaskState::Running.can_transition_to(TaskState::Failed));
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&TaskState::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
