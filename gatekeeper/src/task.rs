//! One execution attempt of a natural-language instruction.

use chrono::{DateTime, Utc};

use crate::core::identity::new_task_id;
use crate::core::types::TaskState;
use crate::error::{Error, Result};
use crate::verifier::Pass;

/// A task and its position in the state machine.
///
/// The ledger is the task's durable history; this value is never persisted on
/// its own. Only the orchestrator moves `state`, and only after the matching
/// `STATE` event has been recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: String,
    text: String,
    state: TaskState,
    created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: new_task_id(),
            text: text.into(),
            state: TaskState::Intake,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Check `state -> next` before it is recorded. COMPLETE needs [`Task::check_completion`].
    pub(crate) fn check_transition(&self, next: TaskState) -> Result<()> {
        if next == TaskState::Complete || !self.state.allows(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        Ok(())
    }

    /// COMPLETE is only reachable from VERIFY, holding a passing verdict.
    pub(crate) fn check_completion(&self, _pass: &Pass) -> Result<()> {
        if !self.state.allows(TaskState::Complete) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: TaskState::Complete,
            });
        }
        Ok(())
    }

    /// Apply a transition whose record is already durable.
    pub(crate) fn enter(&mut self, next: TaskState) {
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_at_intake_with_unique_id() {
        let a = Task::new("bootstrap workspace + run tests");
        let b = Task::new("bootstrap workspace + run tests");
        assert_eq!(a.state(), TaskState::Intake);
        assert_eq!(a.text(), "bootstrap workspace + run tests");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn complete_cannot_be_entered_as_plain_transition() {
        let mut task = Task::new("t");
        task.enter(TaskState::Execute);
        task.enter(TaskState::Verify);
        let err = task.check_transition(TaskState::Complete).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: TaskState::Verify,
                to: TaskState::Complete
            }
        ));
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut task = Task::new("t");
        task.enter(TaskState::Failed);
        assert!(task.check_transition(TaskState::Execute).is_err());
        assert!(task.check_transition(TaskState::Failed).is_err());
    }
}
