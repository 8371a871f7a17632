//! Workspace preparation, the privileged tier that runs once at INTAKE.
//!
//! Preparers are supplied by the caller and never see agent-chosen input.
//! The orchestrator calls [`WorkspacePreparer::prepare`] exactly once per run
//! and aborts the run if it fails.

use std::fs;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::io::git::Git;
use crate::io::workspace::Workspace;

/// Makes a workspace ready for the agent. Must be idempotent.
pub trait WorkspacePreparer {
    fn prepare(&self, workspace: &Workspace) -> Result<()>;
}

/// For workspaces prepared elsewhere.
pub struct NoopPreparer;

impl WorkspacePreparer for NoopPreparer {
    fn prepare(&self, _workspace: &Workspace) -> Result<()> {
        Ok(())
    }
}

/// Ensures the repo root exists and is a git repository.
#[derive(Debug, Clone, Default)]
pub struct GitInitPreparer {
    /// Local `user.name` / `user.email` applied after a fresh init.
    pub identity: Option<(String, String)>,
}

impl GitInitPreparer {
    pub fn with_identity(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            identity: Some((name.into(), email.into())),
        }
    }
}

impl WorkspacePreparer for GitInitPreparer {
    #[instrument(skip_all, fields(workspace_id = %workspace.id()))]
    fn prepare(&self, workspace: &Workspace) -> Result<()> {
        let root = workspace.repo_root();
        fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;

        let git = Git::new(root);
        if git.is_repository() {
            debug!("workspace already a repository");
            return Ok(());
        }
        git.init()
            .with_context(|| format!("init repository {}", root.display()))?;
        if let Some((name, email)) = &self.identity {
            git.set_config("user.name", name)?;
            git.set_config("user.email", email)?;
        }
        info!(root = %root.display(), "initialized workspace repository");
        Ok(())
    }
}
