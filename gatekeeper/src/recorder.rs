//! The executor role's view of the ledger.
//!
//! Every state change and tool invocation goes through here so the record is
//! written before the effect is acknowledged.

use tracing::debug;

use crate::cancel::CancelToken;
use crate::core::types::{TaskState, ToolResult};
use crate::error::Result;
use crate::io::gateway::{Gateway, ToolAction};
use crate::io::ledger::{EventContext, EventDraft, Ledger};
use crate::io::workspace::Workspace;
use crate::task::Task;
use crate::verifier::Pass;

pub(crate) struct Recorder<'a> {
    ledger: &'a Ledger,
    context: EventContext,
}

impl<'a> Recorder<'a> {
    pub(crate) fn new(ledger: &'a Ledger, context: EventContext) -> Self {
        Self { ledger, context }
    }

    pub(crate) fn ledger(&self) -> &'a Ledger {
        self.ledger
    }

    pub(crate) fn context(&self) -> &EventContext {
        &self.context
    }

    /// Record the state the task is already in (INTAKE at creation).
    pub(crate) fn record_current(&self, task: &Task) -> Result<()> {
        self.append(EventDraft::state(task.state()))?;
        Ok(())
    }

    /// Validate, record, then apply `task.state -> next`.
    pub(crate) fn transition(&self, task: &mut Task, next: TaskState) -> Result<()> {
        task.check_transition(next)?;
        self.append(EventDraft::state(next))?;
        debug!(task_id = %task.id(), from = %task.state(), to = %next, "state transition");
        task.enter(next);
        Ok(())
    }

    /// VERIFY -> COMPLETE, which needs the verifier's pass.
    pub(crate) fn complete(&self, task: &mut Task, pass: &Pass) -> Result<()> {
        task.check_completion(pass)?;
        self.append(EventDraft::state(TaskState::Complete))?;
        debug!(
            task_id = %task.id(),
            verify_event = pass.verify_event_hash(),
            "task complete"
        );
        task.enter(TaskState::Complete);
        Ok(())
    }

    /// Record `TOOL_CALL`, invoke, then record `TOOL_RESULT` whatever the outcome.
    ///
    /// A refused invocation is recorded as a rejected result before its error
    /// is returned.
    pub(crate) fn invoke(
        &self,
        gateway: &Gateway,
        workspace: &Workspace,
        action: &ToolAction,
        cancel: &CancelToken,
    ) -> Result<ToolResult> {
        let tool = action.tool_name();
        let args_hash = action.args_hash();
        self.append(EventDraft::tool_call(tool, &args_hash))?;
        match gateway.invoke(workspace, action, cancel) {
            Ok(result) => {
                self.append(EventDraft::tool_result(tool, &args_hash, &result))?;
                Ok(result)
            }
            Err(err) => {
                let rejected = ToolResult::rejected(&err.to_string());
                self.append(EventDraft::tool_result(tool, &args_hash, &rejected))?;
                Err(err)
            }
        }
    }

    pub(crate) fn claim(&self, message: &str, diff_hash: &str) -> Result<()> {
        self.append(EventDraft::claim(message, diff_hash))?;
        Ok(())
    }

    fn append(&self, draft: EventDraft) -> Result<String> {
        self.ledger.append(&self.context, draft)
    }
}
