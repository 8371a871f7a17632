//! The filesystem sandbox a task may act within.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::core::identity::workspace_id;
use crate::core::scope::{is_within, normalize_lexically};
use crate::error::{Error, Result};

/// A resolved workspace: a repository root and the sandbox boundary inside it.
///
/// Fields are private so `allowed_root` is always `repo_root` or a descendant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    id: String,
    repo_root: PathBuf,
    allowed_root: PathBuf,
}

impl Workspace {
    /// Resolve `path` to an absolute, lexically normalized root.
    ///
    /// Touches nothing on disk; the directory need not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).map_err(|source| Error::WorkspaceResolve {
            path: path.to_path_buf(),
            source,
        })?;
        let repo_root = normalize_lexically(&absolute);
        Ok(Self {
            id: workspace_id(&repo_root),
            allowed_root: repo_root.clone(),
            repo_root,
        })
    }

    /// Narrow the sandbox to `path` (relative paths resolve against the repo root).
    pub fn with_allowed_root(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let narrowed = normalize_lexically(&self.repo_root.join(path));
        if !is_within(&self.repo_root, &narrowed) {
            return Err(Error::ScopeViolation {
                path: narrowed,
                allowed_root: self.repo_root,
            });
        }
        self.allowed_root = narrowed;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn allowed_root(&self) -> &Path {
        &self.allowed_root
    }

    /// Resolve `path` (relative paths against the repo root) and require it to
    /// stay inside the allowed root.
    pub fn ensure_in_scope(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let resolved = normalize_lexically(&self.repo_root.join(path));
        if !is_within(&self.allowed_root, &resolved) {
            warn!(
                path = %resolved.display(),
                allowed_root = %self.allowed_root.display(),
                "path out of scope"
            );
            return Err(Error::ScopeViolation {
                path: resolved,
                allowed_root: self.allowed_root.clone(),
            });
        }
        Ok(resolved)
    }
}
