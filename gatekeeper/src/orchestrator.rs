//! Drives one task through INTAKE -> EXECUTE -> VERIFY -> COMPLETE | FAILED.
//!
//! The orchestrator owns sequencing only. What to change comes from the
//! caller's [`TaskPlan`]; how to prepare the workspace comes from the
//! caller's [`WorkspacePreparer`]. Every step is recorded before it takes
//! effect, and any error after INTAKE leaves `STATE=FAILED` as the last state
//! event unless the ledger itself is what failed.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::types::{TaskState, Termination, ToolResult};
use crate::error::{Error, Result};
use crate::io::bootstrap::WorkspacePreparer;
use crate::io::config::GatekeeperConfig;
use crate::io::gateway::{Gateway, ToolAction};
use crate::io::ledger::{EventContext, Ledger};
use crate::io::workspace::Workspace;
use crate::plan::TaskPlan;
use crate::recorder::Recorder;
use crate::task::Task;
use crate::verifier::{Verdict, Verifier};

/// Policy identifier used when none is configured.
pub const DEFAULT_POLICY_VERSION: &str = "phase0";

/// Input for one [`Orchestrator::run`].
#[derive(Debug)]
pub struct RunRequest {
    pub task_text: String,
    pub workspace: Workspace,
    pub plan: TaskPlan,
}

/// A task that reached COMPLETE.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub task: Task,
    pub workspace: Workspace,
    pub final_state: TaskState,
    /// Ledger head after the COMPLETE event.
    pub head: Option<String>,
}

pub struct Orchestrator<P> {
    ledger: Arc<Ledger>,
    gateway: Gateway,
    preparer: P,
    policy_version: String,
}

impl<P: WorkspacePreparer> Orchestrator<P> {
    pub fn new(ledger: Arc<Ledger>, gateway: Gateway, preparer: P) -> Self {
        Self {
            ledger,
            gateway,
            preparer,
            policy_version: DEFAULT_POLICY_VERSION.to_string(),
        }
    }

    /// Open the configured ledger and build the gateway from `cfg`.
    pub fn from_config(cfg: &GatekeeperConfig, preparer: P) -> Result<Self> {
        cfg.validate().map_err(Error::Config)?;
        let ledger = Arc::new(Ledger::open(&cfg.ledger_path)?);
        Ok(Self::new(ledger, Gateway::from_config(cfg), preparer)
            .with_policy_version(cfg.policy_version.clone()))
    }

    pub fn with_policy_version(mut self, policy_version: impl Into<String>) -> Self {
        self.policy_version = policy_version.into();
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Run one task to a terminal state.
    ///
    /// `Ok` means COMPLETE. Every `Err` except a ledger failure has already
    /// been recorded as `STATE=FAILED`.
    #[instrument(skip_all, fields(workspace_id = %request.workspace.id()))]
    pub fn run(&self, request: RunRequest, cancel: &CancelToken) -> Result<RunOutcome> {
        let RunRequest {
            task_text,
            workspace,
            plan,
        } = request;
        let mut task = Task::new(task_text);
        let recorder = Recorder::new(
            &self.ledger,
            EventContext {
                task_id: task.id().to_string(),
                workspace_id: workspace.id().to_string(),
                policy_version: self.policy_version.clone(),
            },
        );
        info!(task_id = %task.id(), repo_root = %workspace.repo_root().display(), "task created");

        if let Err(err) = self.drive(&recorder, &mut task, &workspace, &plan, cancel) {
            return Err(fail(&recorder, &mut task, err));
        }
        info!(task_id = %task.id(), "task complete");
        Ok(RunOutcome {
            final_state: task.state(),
            head: self.ledger.head(),
            task,
            workspace,
        })
    }

    fn drive(
        &self,
        recorder: &Recorder<'_>,
        task: &mut Task,
        workspace: &Workspace,
        plan: &TaskPlan,
        cancel: &CancelToken,
    ) -> Result<()> {
        recorder.record_current(task)?;
        checkpoint(cancel)?;
        self.preparer
            .prepare(workspace)
            .map_err(Error::PreparationFailed)?;

        checkpoint(cancel)?;
        recorder.transition(task, TaskState::Execute)?;
        self.execute(recorder, workspace, plan, cancel)?;

        checkpoint(cancel)?;
        recorder.transition(task, TaskState::Verify)?;
        self.verify(recorder, task, workspace, plan, cancel)
    }

    fn execute(
        &self,
        recorder: &Recorder<'_>,
        workspace: &Workspace,
        plan: &TaskPlan,
        cancel: &CancelToken,
    ) -> Result<()> {
        for planned in &plan.actions {
            checkpoint(cancel)?;
            let action = planned.action();
            let result = recorder.invoke(&self.gateway, workspace, action, cancel)?;
            if result.success() {
                continue;
            }
            self.check_interrupted(action, &result)?;
            if planned.is_tolerated(workspace) {
                info!(
                    tool = action.tool_name(),
                    exit_code = result.exit_code,
                    "action failed but its effect is already present"
                );
                continue;
            }
            return Err(tool_failed(action, &result));
        }

        checkpoint(cancel)?;
        let diff = recorder.invoke(&self.gateway, workspace, &ToolAction::Diff, cancel)?;
        if !diff.success() {
            self.check_interrupted(&ToolAction::Diff, &diff)?;
            return Err(tool_failed(&ToolAction::Diff, &diff));
        }
        recorder.claim(&plan.claim, &diff.stdout_hash)
    }

    fn verify(
        &self,
        recorder: &Recorder<'_>,
        task: &mut Task,
        workspace: &Workspace,
        plan: &TaskPlan,
        cancel: &CancelToken,
    ) -> Result<()> {
        let verifier = Verifier::new(recorder.ledger(), recorder.context());
        let action = ToolAction::RunVerificationScript {
            script: plan.verification_script.clone(),
        };
        let result = match recorder.invoke(&self.gateway, workspace, &action, cancel) {
            Ok(result) => result,
            Err(err) if err.is_ledger_failure() => return Err(err),
            Err(err) => {
                // A refused run still gets a verdict; the refusal is the more precise error.
                verifier.judge(&ToolResult::rejected(&err.to_string()))?;
                return Err(err);
            }
        };
        if result.termination == Termination::Cancelled {
            return Err(Error::Cancelled);
        }

        match verifier.judge(&result)? {
            Verdict::Pass(pass) => recorder.complete(task, &pass),
            Verdict::Block { exit_code } => Err(Error::VerificationBlocked { exit_code }),
        }
    }

    /// Map a cancelled or timed-out child to its error. Neither is ever tolerated.
    fn check_interrupted(&self, action: &ToolAction, result: &ToolResult) -> Result<()> {
        match result.termination {
            Termination::Cancelled => Err(Error::Cancelled),
            Termination::TimedOut => Err(Error::TimeoutExceeded {
                tool: action.tool_name().to_string(),
                timeout: self.gateway.timeout_for(action),
            }),
            _ => Ok(()),
        }
    }
}

fn checkpoint(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn tool_failed(action: &ToolAction, result: &ToolResult) -> Error {
    Error::ToolExecutionFailed {
        tool: action.tool_name().to_string(),
        exit_code: result.exit_code,
    }
}

/// Record `STATE=FAILED` for `err` and hand back the error to surface.
fn fail(recorder: &Recorder<'_>, task: &mut Task, err: Error) -> Error {
    if err.is_ledger_failure() {
        error!(task_id = %task.id(), error = %err, "ledger failed; task state not recorded");
        return err;
    }
    warn!(task_id = %task.id(), state = %task.state(), error = %err, "task failed");
    match recorder.transition(task, TaskState::Failed) {
        Ok(()) => err,
        Err(record_err) => {
            error!(
                task_id = %task.id(),
                error = %record_err,
                cause = %err,
                "could not record FAILED"
            );
            record_err
        }
    }
}
