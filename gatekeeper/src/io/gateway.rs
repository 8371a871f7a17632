//! Scoped subprocess execution boundary between agent-chosen actions and the OS.
//!
//! Every primitive checks the workspace scope first, runs its child with an
//! argument vector (never a shell), and returns a [`ToolResult`] whether the
//! child succeeded or not. Only pre-registered verification scripts can be run;
//! there is no way to pass an arbitrary command line through the gateway.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::digest::hash_str;
use crate::core::types::ToolResult;
use crate::error::{Error, Result};
use crate::io::config::GatekeeperConfig;
use crate::io::process::{RunLimits, run_command};
use crate::io::workspace::Workspace;

/// An action the executor may ask the gateway to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAction {
    Status,
    Diff,
    ApplyPatch { patch: String },
    RunVerificationScript { script: PathBuf },
}

impl ToolAction {
    /// Name recorded in the ledger's `tool_name` field.
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolAction::Status => "git.status",
            ToolAction::Diff => "git.diff",
            ToolAction::ApplyPatch { .. } => "git.apply_patch",
            ToolAction::RunVerificationScript { .. } => "test.run_script_only",
        }
    }

    /// Digest of the action's argument payload; the payload itself is never recorded.
    pub fn args_hash(&self) -> String {
        match self {
            ToolAction::Status => hash_str("status --porcelain"),
            ToolAction::Diff => hash_str("diff"),
            ToolAction::ApplyPatch { patch } => hash_str(patch),
            ToolAction::RunVerificationScript { script } => {
                hash_str(&script.to_string_lossy())
            }
        }
    }
}

/// Per-primitive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayLimits {
    pub inspect_timeout: Duration,
    pub apply_timeout: Duration,
    pub verify_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for GatewayLimits {
    fn default() -> Self {
        Self::from(&GatekeeperConfig::default())
    }
}

impl From<&GatekeeperConfig> for GatewayLimits {
    fn from(cfg: &GatekeeperConfig) -> Self {
        Self {
            inspect_timeout: cfg.inspect_timeout(),
            apply_timeout: cfg.apply_timeout(),
            verify_timeout: cfg.verify_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

/// The agent-facing tool tier.
#[derive(Debug, Clone, Default)]
pub struct Gateway {
    limits: GatewayLimits,
    scripts: BTreeSet<PathBuf>,
}

impl Gateway {
    pub fn new(limits: GatewayLimits) -> Self {
        Self {
            limits,
            scripts: BTreeSet::new(),
        }
    }

    /// Gateway with the config's limits and registered verification scripts.
    pub fn from_config(cfg: &GatekeeperConfig) -> Self {
        let mut gateway = Self::new(GatewayLimits::from(cfg));
        for script in &cfg.verification.scripts {
            gateway.register_script(script);
        }
        gateway
    }

    /// Allow `script` to be run by [`Gateway::run_verification_script`].
    pub fn register_script(&mut self, script: impl Into<PathBuf>) -> &mut Self {
        self.scripts.insert(script.into());
        self
    }

    pub fn limits(&self) -> GatewayLimits {
        self.limits
    }

    /// Wall-clock bound the primitive behind `action` runs under.
    pub fn timeout_for(&self, action: &ToolAction) -> Duration {
        match action {
            ToolAction::Status | ToolAction::Diff => self.limits.inspect_timeout,
            ToolAction::ApplyPatch { .. } => self.limits.apply_timeout,
            ToolAction::RunVerificationScript { .. } => self.limits.verify_timeout,
        }
    }

    /// Dispatch `action` to its primitive.
    pub fn invoke(
        &self,
        workspace: &Workspace,
        action: &ToolAction,
        cancel: &CancelToken,
    ) -> Result<ToolResult> {
        match action {
            ToolAction::Status => self.status(workspace, cancel),
            ToolAction::Diff => self.diff(workspace, cancel),
            ToolAction::ApplyPatch { patch } => self.apply_patch(workspace, patch, cancel),
            ToolAction::RunVerificationScript { script } => {
                self.run_verification_script(workspace, script, cancel)
            }
        }
    }

    /// `git status --porcelain` in the sandbox root.
    #[instrument(skip_all, fields(workspace_id = %workspace.id()))]
    pub fn status(&self, workspace: &Workspace, cancel: &CancelToken) -> Result<ToolResult> {
        self.git(
            workspace,
            "git.status",
            &["status", "--porcelain"],
            None,
            self.limits.inspect_timeout,
            cancel,
        )
    }

    /// `git diff` in the sandbox root.
    #[instrument(skip_all, fields(workspace_id = %workspace.id()))]
    pub fn diff(&self, workspace: &Workspace, cancel: &CancelToken) -> Result<ToolResult> {
        self.git(
            workspace,
            "git.diff",
            &["diff"],
            None,
            self.limits.inspect_timeout,
            cancel,
        )
    }

    /// `git apply -` with `patch` fed on stdin.
    ///
    /// Run from the sandbox root, git ignores patched paths outside it and
    /// refuses paths that leave the working tree.
    #[instrument(skip_all, fields(workspace_id = %workspace.id(), patch_bytes = patch.len()))]
    pub fn apply_patch(
        &self,
        workspace: &Workspace,
        patch: &str,
        cancel: &CancelToken,
    ) -> Result<ToolResult> {
        self.git(
            workspace,
            "git.apply_patch",
            &["apply", "-"],
            Some(patch.as_bytes()),
            self.limits.apply_timeout,
            cancel,
        )
    }

    /// Run a registered verification script with the sandbox root as its only argument.
    ///
    /// Relative script paths resolve against the repo root and must stay in scope.
    #[instrument(skip_all, fields(workspace_id = %workspace.id(), script = %script.display()))]
    pub fn run_verification_script(
        &self,
        workspace: &Workspace,
        script: &Path,
        cancel: &CancelToken,
    ) -> Result<ToolResult> {
        if !self.scripts.contains(script) {
            warn!("refusing unregistered verification script");
            return Err(Error::UnregisteredScript(script.to_path_buf()));
        }
        let program = if script.is_absolute() {
            script.to_path_buf()
        } else {
            workspace.ensure_in_scope(script)?
        };
        let root = workspace.ensure_in_scope(workspace.allowed_root())?;

        let mut cmd = Command::new(&program);
        cmd.arg(&root).current_dir(&root);
        let result = run_command(
            "test.run_script_only",
            cmd,
            None,
            self.run_limits(self.limits.verify_timeout),
            cancel,
        )?;
        info!(exit_code = result.exit_code, termination = ?result.termination, "verification script finished");
        Ok(result)
    }

    fn git(
        &self,
        workspace: &Workspace,
        label: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ToolResult> {
        let root = workspace.ensure_in_scope(workspace.allowed_root())?;
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&root);
        let result = run_command(label, cmd, stdin, self.run_limits(timeout), cancel)?;
        info!(tool = label, exit_code = result.exit_code, termination = ?result.termination, "git finished");
        Ok(result)
    }

    fn run_limits(&self, timeout: Duration) -> RunLimits {
        RunLimits {
            timeout,
            output_limit_bytes: self.limits.output_limit_bytes,
        }
    }
}
