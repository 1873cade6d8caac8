//! Error types for runas-command
//!
//! Every failure the executors can hit is a [`RunAsError`]. Two groups exist:
//! - Errors returned to the caller: policy violations and malformed requests.
//!   These are detected before anything is spawned.
//! - Errors folded into a failed [`ExecutionResult`](crate::ExecutionResult):
//!   filesystem and process failures that happen while executing.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`RunAsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Execution forbidden for the current identity
    PolicyViolation,
    /// Missing field, unsupported elevation token, bad base64, bad config
    InputValidation,
    /// Temp directory or script file problems
    Filesystem,
    /// Spawn failure or abnormal runner behavior
    Process,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::PolicyViolation => write!(f, "policy violation"),
            ErrorKind::InputValidation => write!(f, "input validation"),
            ErrorKind::Filesystem => write!(f, "filesystem"),
            ErrorKind::Process => write!(f, "process"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunAsError {
    #[error("Configuration prohibits execution with user: {user}")]
    PolicyViolation { user: String },

    #[error("missing required argument: {0}")]
    MissingField(&'static str),

    #[error("unsupported elevation type: {0:?} (expected \"\" or \"sudo\")")]
    UnsupportedElevation(String),

    #[error("base64 decoding failed: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("invalid configuration at {location}: {reason}")]
    Config { location: String, reason: String },

    #[error("{action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Partial output captured before the failure travels with the error.
    #[error("failed to run \"{command}\": {reason}")]
    Process {
        command: String,
        reason: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    #[error("execution worker exited without reporting a result")]
    WorkerLost,
}

impl RunAsError {
    /// Process failure without any captured output
    pub fn process(command: impl Into<String>, reason: impl Into<String>) -> Self {
        RunAsError::Process {
            command: command.into(),
            reason: reason.into(),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    pub fn filesystem(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        RunAsError::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RunAsError::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            RunAsError::MissingField(_)
            | RunAsError::UnsupportedElevation(_)
            | RunAsError::Base64Decode(_)
            | RunAsError::Config { .. } => ErrorKind::InputValidation,
            RunAsError::Filesystem { .. } => ErrorKind::Filesystem,
            RunAsError::Process { .. } | RunAsError::WorkerLost => ErrorKind::Process,
        }
    }

    /// Whether executors turn this error into a failed result instead of
    /// returning it to the caller.
    pub fn is_folded(&self) -> bool {
        matches!(self.kind(), ErrorKind::Filesystem | ErrorKind::Process)
    }

    /// Output captured before the failure, `(stdout, stderr)`.
    pub fn partial_output(&self) -> (&[u8], &[u8]) {
        match self {
            RunAsError::Process { stdout, stderr, .. } => (stdout.as_slice(), stderr.as_slice()),
            _ => (&[][..], &[][..]),
        }
    }
}
