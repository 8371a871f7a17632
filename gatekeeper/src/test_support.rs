//! Test-only helpers: a throwaway git repository to run tasks against.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::io::git::Git;
use crate::io::workspace::Workspace;

/// Unified diff that adds a single line to `README.md` (which must not exist yet).
pub const README_PATCH: &str = "diff --git a/README.md b/README.md
new file mode 100644
index 0000000..c0f1e2b
--- /dev/null
+++ b/README.md
@@ -0,0 +1 @@
+gatekeeper was here
";

/// Temporary git repository with a local identity and its own ledger path.
///
/// The ledger lives beside the repository, not inside it, so it never shows
/// up in `git status` or `git diff`.
pub struct TestRepo {
    temp: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { temp };
        fs::create_dir(repo.root()).context("create repo dir")?;
        let git = Git::new(repo.root());
        git.init()?;
        git.set_config("user.name", "Gatekeeper Test")?;
        git.set_config("user.email", "gatekeeper@test.invalid")?;
        Ok(repo)
    }

    /// An empty directory that is not yet a repository.
    pub fn uninitialized() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> PathBuf {
        self.temp.path().join("repo")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.temp.path().join("ledger").join("ledger.jsonl")
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::open(self.root()).expect("workspace for temp repo")
    }

    pub fn write_file(&self, rel: impl AsRef<Path>, contents: &str) -> Result<PathBuf> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Write an executable script inside the repository.
    pub fn write_script(&self, rel: impl AsRef<Path>, body: &str) -> Result<PathBuf> {
        let path = self.write_file(rel, body)?;
        make_executable(&path)?;
        Ok(path)
    }

    /// Write an executable script beside the repository, for registering by
    /// absolute path before the workspace exists.
    pub fn write_external_script(&self, name: &str, body: &str) -> Result<PathBuf> {
        let dir = self.temp.path().join("scripts");
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(name);
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        make_executable(&path)?;
        Ok(path)
    }

    pub fn commit_all(&self, message: &str) -> Result<bool> {
        let git = Git::new(self.root());
        git.add_all()?;
        git.commit_staged(message)
    }
}

fn make_executable(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod {}", path.display()))
}
