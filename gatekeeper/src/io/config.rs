//! Gatekeeper configuration stored under `.gatekeeper/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Location of the configuration file, relative to a workspace root.
pub const DEFAULT_CONFIG_PATH: &str = ".gatekeeper/config.toml";

/// Gatekeeper configuration (TOML).
///
/// Missing fields default to the values the runtime has always used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Governance policy identifier stamped on every ledger event.
    pub policy_version: String,

    /// Ledger file location (relative paths resolve against the process cwd).
    pub ledger_path: PathBuf,

    /// Bound for read-only version-control inspections (`status`, `diff`).
    pub inspect_timeout_secs: u64,

    /// Bound for applying a patch.
    pub apply_timeout_secs: u64,

    /// Bound for one verification script run.
    pub verify_timeout_secs: u64,

    /// Captured stdout/stderr beyond this many bytes is drained and dropped.
    pub output_limit_bytes: usize,

    pub verification: VerificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct VerificationConfig {
    /// Pre-registered verification scripts. Relative paths resolve against the
    /// workspace root when run.
    pub scripts: Vec<PathBuf>,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            policy_version: "phase0".to_string(),
            ledger_path: PathBuf::from(".gatekeeper/ledger.jsonl"),
            inspect_timeout_secs: 10,
            apply_timeout_secs: 10,
            verify_timeout_secs: 60,
            output_limit_bytes: 1_000_000,
            verification: VerificationConfig::default(),
        }
    }
}

impl GatekeeperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.policy_version.trim().is_empty() {
            return Err(anyhow!("policy_version must be non-empty"));
        }
        if self.ledger_path.as_os_str().is_empty() {
            return Err(anyhow!("ledger_path must be non-empty"));
        }
        for (name, value) in [
            ("inspect_timeout_secs", self.inspect_timeout_secs),
            ("apply_timeout_secs", self.apply_timeout_secs),
            ("verify_timeout_secs", self.verify_timeout_secs),
        ] {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self
            .verification
            .scripts
            .iter()
            .any(|script| script.as_os_str().is_empty())
        {
            return Err(anyhow!("verification.scripts entries must be non-empty"));
        }
        Ok(())
    }

    pub fn inspect_timeout(&self) -> Duration {
        Duration::from_secs(self.inspect_timeout_secs)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GatekeeperConfig::default()`.
pub fn load_config(path: &Path) -> Result<GatekeeperConfig> {
    if !path.exists() {
        let cfg = GatekeeperConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GatekeeperConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Load `<root>/.gatekeeper/config.toml`.
///
/// A relative `ledger_path` is resolved against `root`, so the ledger lands in
/// the workspace no matter where the process runs.
pub fn load_workspace_config(root: &Path) -> Result<GatekeeperConfig> {
    let mut cfg = load_config(&root.join(DEFAULT_CONFIG_PATH))?;
    if cfg.ledger_path.is_relative() {
        cfg.ledger_path = root.join(&cfg.ledger_path);
    }
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GatekeeperConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GatekeeperConfig::default());
        assert_eq!(cfg.verify_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.inspect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".gatekeeper").join("config.toml");
        let cfg = GatekeeperConfig {
            verification: VerificationConfig {
                scripts: vec![PathBuf::from("scripts/verify.sh")],
            },
            ..GatekeeperConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn workspace_config_is_found_under_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = GatekeeperConfig {
            policy_version: "phase1".to_string(),
            ..GatekeeperConfig::default()
        };
        write_config(&temp.path().join(DEFAULT_CONFIG_PATH), &cfg).expect("write");

        let loaded = load_workspace_config(temp.path()).expect("load");
        assert_eq!(loaded.policy_version, "phase1");
        assert_eq!(
            loaded.ledger_path,
            temp.path().join(".gatekeeper").join("ledger.jsonl")
        );
    }

    #[test]
    fn workspace_config_keeps_absolute_ledger_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let elsewhere = tempfile::tempdir().expect("tempdir");
        let cfg = GatekeeperConfig {
            ledger_path: elsewhere.path().join("ledger.jsonl"),
            ..GatekeeperConfig::default()
        };
        write_config(&temp.path().join(DEFAULT_CONFIG_PATH), &cfg).expect("write");

        let loaded = load_workspace_config(temp.path()).expect("load");
        assert_eq!(loaded.ledger_path, elsewhere.path().join("ledger.jsonl"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "verify_timeout_secs = 5\n\n[verification]\nscripts = [\"scripts/ci.sh\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.verify_timeout_secs, 5);
        assert_eq!(cfg.apply_timeout_secs, 10);
        assert_eq!(cfg.verification.scripts, vec![PathBuf::from("scripts/ci.sh")]);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "apply_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("apply_timeout_secs must be > 0"));
    }
}
