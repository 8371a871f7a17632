//! Git adapter for the privileged bootstrap tier.
//!
//! Unlike the [`Gateway`](crate::io::gateway::Gateway), this adapter is never
//! driven by agent-chosen content: callers are workspace preparers and tests.
//! Every call is a fixed argument vector; nothing goes through a shell.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// True if the working directory has its own `.git`.
    pub fn is_repository(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn init(&self) -> Result<()> {
        debug!("initializing repository");
        self.run_checked(&["init", "--quiet"])?;
        Ok(())
    }

    /// Set a repository-local config value.
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.run_checked(&["config", key, value])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "--quiet", "-m", message])?;
        Ok(true)
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
