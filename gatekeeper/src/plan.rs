//! Caller-supplied description of what a task does.
//!
//! The content of a plan (which patch, which script) comes from outside the
//! trust layer; the orchestrator only sequences and records it.

use std::fmt;
use std::path::PathBuf;

use crate::io::gateway::ToolAction;
use crate::io::workspace::Workspace;

/// Decides, by inspecting the workspace, whether a failed action's effect is
/// already present (so the failure can be tolerated).
pub type IdempotencePredicate = Box<dyn Fn(&Workspace) -> bool + Send + Sync>;

/// One EXECUTE-phase gateway call.
pub struct PlannedAction {
    action: ToolAction,
    already_applied: Option<IdempotencePredicate>,
}

impl PlannedAction {
    pub fn apply_patch(patch: impl Into<String>) -> Self {
        Self::new(ToolAction::ApplyPatch {
            patch: patch.into(),
        })
    }

    pub fn status() -> Self {
        Self::new(ToolAction::Status)
    }

    pub fn diff() -> Self {
        Self::new(ToolAction::Diff)
    }

    fn new(action: ToolAction) -> Self {
        Self {
            action,
            already_applied: None,
        }
    }

    /// Tolerate a failure of this action when `predicate` reports that its
    /// effect already exists. The failure is still recorded as a failure.
    pub fn tolerate_if(
        mut self,
        predicate: impl Fn(&Workspace) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.already_applied = Some(Box::new(predicate));
        self
    }

    pub fn action(&self) -> &ToolAction {
        &self.action
    }

    pub fn is_tolerated(&self, workspace: &Workspace) -> bool {
        self.already_applied
            .as_ref()
            .is_some_and(|already_applied| already_applied(workspace))
    }
}

impl fmt::Debug for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedAction")
            .field("tool", &self.action.tool_name())
            .field("tolerant", &self.already_applied.is_some())
            .finish()
    }
}

/// Everything the orchestrator needs to drive one task.
#[derive(Debug)]
pub struct TaskPlan {
    /// EXECUTE-phase actions, run in order.
    pub actions: Vec<PlannedAction>,
    /// The executor's self-reported outcome, recorded as a `CLAIM`.
    pub claim: String,
    /// Registered script the verifier runs in the VERIFY phase.
    pub verification_script: PathBuf,
}
