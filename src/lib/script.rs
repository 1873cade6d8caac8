//! Script materializer
//!
//! Writes a script body to a uniquely named, owner-executable file so it can
//! be invoked as a command. The returned [`ScriptFile`] owns the file and
//! deletes it when dropped, whichever way the execution ends.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::RunAsError;
use crate::log_suppressor::LogSuppressor;

/// File name prefix for materialized scripts
const SCRIPT_PREFIX: &str = "runas-script-";

/// Pick the directory scripts are written to: `preferred` when it exists,
/// otherwise the platform temp directory. The fallback is reported through
/// `suppressor`, keyed by the missing directory.
pub fn resolve_script_dir(preferred: &Path, suppressor: &LogSuppressor) -> PathBuf {
    if preferred.is_dir() {
        return preferred.to_path_buf();
    }

    let fallback = env::temp_dir();
    suppressor.log(
        &preferred.to_string_lossy(),
        &format!(
            "Default tmp directory {} does not exist. Falling back to {}",
            preferred.display(),
            fallback.display()
        ),
    );
    fallback
}

/// A materialized script, deleted on drop
#[derive(Debug)]
pub struct ScriptFile {
    path: PathBuf,
}

impl ScriptFile {
    /// Create a new file in `dir` holding `body` verbatim, executable by its
    /// owner.
    pub fn materialize(body: &str, dir: &Path) -> Result<Self, RunAsError> {
        let path = dir.join(format!("{}{}", SCRIPT_PREFIX, Uuid::new_v4()));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&path)
            .map_err(|e| RunAsError::filesystem("creating script file", &path, e))?;
        // From here on the guard removes the file on every exit path
        let script = ScriptFile { path };

        file.write_all(body.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| RunAsError::filesystem("writing script file", &script.path, e))?;
        // Executing a file that is still open for writing fails with ETXTBSY
        drop(file);

        script.make_executable()?;
        tracing::trace!(path = %script.path.display(), "materialized script");
        Ok(script)
    }

    #[cfg(unix)]
    fn make_executable(&self) -> Result<(), RunAsError> {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(&self.path)
            .map_err(|e| RunAsError::filesystem("reading script attributes", &self.path, e))?
            .permissions();
        permissions.set_mode(permissions.mode() | 0o100);
        fs::set_permissions(&self.path, permissions)
            .map_err(|e| RunAsError::filesystem("marking script executable", &self.path, e))
    }

    #[cfg(not(unix))]
    fn make_executable(&self) -> Result<(), RunAsError> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<path> <arguments>`, separated by a single space
    pub fn command_line(&self, arguments: &str) -> String {
        format!("{} {}", self.path.display(), arguments)
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "deleted script"),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "could not delete script file"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_materialize_writes_body_verbatim() {
        let dir = TempDir::new().unwrap();
        let script = ScriptFile::materialize("#!/bin/sh\necho hi\n", dir.path()).unwrap();
        assert!(script.path().starts_with(dir.path()));
        assert_eq!(fs::read_to_string(script.path()).unwrap(), "#!/bin/sh\necho hi\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_materialize_sets_owner_execute() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = ScriptFile::materialize("exit 0\n", dir.path()).unwrap();
        let mode = fs::metadata(script.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o100, 0o100);
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_drop_deletes_file() {
        let dir = TempDir::new().unwrap();
        let script = ScriptFile::materialize("true\n", dir.path()).unwrap();
        let path = script.path().to_path_buf();
        assert!(path.exists());
        drop(script);
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_tolerates_already_deleted_file() {
        let dir = TempDir::new().unwrap();
        let script = ScriptFile::materialize("true\n", dir.path()).unwrap();
        fs::remove_file(script.path()).unwrap();
        drop(script);
    }

    #[test]
    fn test_names_are_unique() {
        let dir = TempDir::new().unwrap();
        let a = ScriptFile::materialize("a", dir.path()).unwrap();
        let b = ScriptFile::materialize("b", dir.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_materialize_in_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let err = ScriptFile::materialize("true", &dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, RunAsError::Filesystem { .. }));
    }

    #[test]
    fn test_command_line() {
        let dir = TempDir::new().unwrap();
        let script = ScriptFile::materialize("true", dir.path()).unwrap();
        assert_eq!(
            script.command_line("-v 'a b'"),
            format!("{} -v 'a b'", script.path().display())
        );
        assert_eq!(script.command_line(""), format!("{} ", script.path().display()));
    }

    #[test]
    fn test_resolve_prefers_existing_directory() {
        let dir = TempDir::new().unwrap();
        let suppressor = LogSuppressor::default();
        assert_eq!(resolve_script_dir(dir.path(), &suppressor), dir.path());
    }

    #[test]
    fn test_resolve_falls_back_to_temp_dir() {
        let dir = TempDir::new().unwrap();
        let suppressor = LogSuppressor::default();
        let missing = dir.path().join("missing");
        assert_eq!(resolve_script_dir(&missing, &suppressor), env::temp_dir());
        // second lookup is suppressed, not skipped
        assert_eq!(resolve_script_dir(&missing, &suppressor), env::temp_dir());
    }
}
