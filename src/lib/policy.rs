//! Execution policy
//!
//! Process-wide settings that govern every execution: whether the superuser
//! may run commands at all, the working directory and optional change-root
//! for spawned processes, and where scripts are materialized.
//!
//! The policy is read from a line based configuration file:
//!
//! ```text
//! # comment
//! AllowRoot = false
//! CWD = /var/opt/runas/run
//! ChRootPath =
//! TmpDir = /etc/opt/runas/conf/tmpdir/
//! ```
//!
//! and may be overridden from the environment (`RUNAS_ALLOW_ROOT`,
//! `RUNAS_CWD`, `RUNAS_CHROOT`, `RUNAS_TMPDIR`).

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RunAsError;
use crate::identity::Identity;

/// Preferred directory for materialized scripts
pub const DEFAULT_TMP_DIR: &str = "/etc/opt/runas/conf/tmpdir/";

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/opt/runas/conf/runas.conf";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPolicy {
    /// Allow executions while running as the superuser
    pub allow_root: bool,
    /// Working directory for spawned processes (inherit when unset)
    pub cwd: Option<PathBuf>,
    /// Change-root applied to spawned processes
    pub chroot_path: Option<PathBuf>,
    /// Preferred directory for materialized scripts
    pub tmp_dir: PathBuf,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        ExecutionPolicy {
            allow_root: true,
            cwd: None,
            chroot_path: None,
            tmp_dir: PathBuf::from(DEFAULT_TMP_DIR),
        }
    }
}

impl ExecutionPolicy {
    /// Load the policy from `path` (defaults when the file does not exist),
    /// then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, RunAsError> {
        let mut policy = match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content, &path.display().to_string())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            Err(e) => return Err(RunAsError::filesystem("reading configuration", path, e)),
        };
        policy.apply_env()?;
        Ok(policy)
    }

    /// Parse configuration file content. `origin` names the source in errors.
    pub fn parse(content: &str, origin: &str) -> Result<Self, RunAsError> {
        let mut policy = Self::default();

        for (index, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let location = format!("{}:{}", origin, index + 1);
            let (key, value) = line.split_once('=').ok_or_else(|| RunAsError::Config {
                location: location.clone(),
                reason: format!("expected `Key = Value`, got {:?}", line),
            })?;

            policy.set(key.trim(), value.trim(), &location)?;
        }

        Ok(policy)
    }

    fn set(&mut self, key: &str, value: &str, location: &str) -> Result<(), RunAsError> {
        match key.to_lowercase().as_str() {
            "allowroot" => self.allow_root = parse_bool(value, location)?,
            "cwd" => self.cwd = non_empty_path(value),
            "chrootpath" => self.chroot_path = non_empty_path(value),
            "tmpdir" => {
                self.tmp_dir = non_empty_path(value).unwrap_or_else(|| PathBuf::from(DEFAULT_TMP_DIR))
            }
            _ => tracing::debug!(key, location, "ignoring unknown configuration key"),
        }
        Ok(())
    }

    /// Apply `RUNAS_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), RunAsError> {
        let overrides = [
            ("RUNAS_ALLOW_ROOT", "AllowRoot"),
            ("RUNAS_CWD", "CWD"),
            ("RUNAS_CHROOT", "ChRootPath"),
            ("RUNAS_TMPDIR", "TmpDir"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                self.set(key, value.trim(), var)?;
            }
        }
        Ok(())
    }

    /// Policy gate: refuse to execute as the superuser unless allowed.
    pub fn check_allowed(&self, identity: &dyn Identity) -> Result<(), RunAsError> {
        if !self.allow_root && identity.is_root() {
            return Err(RunAsError::PolicyViolation {
                user: identity.user_name(),
            });
        }
        Ok(())
    }
}

fn parse_bool(value: &str, location: &str) -> Result<bool, RunAsError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(RunAsError::Config {
            location: location.to_string(),
            reason: format!("expected a boolean, got {:?}", value),
        }),
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
