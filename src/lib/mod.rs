//! runas-command library
//!
//! Executes commands, shell commands and scripts on behalf of a management
//! agent, under an execution policy, with optional sudo elevation, a timeout
//! and bounded output.

pub mod elevation;
pub mod error;
pub mod identity;
pub mod log_suppressor;
pub mod output_limiter;
pub mod policy;
pub mod provider;
pub mod request;
pub mod runner;
pub mod script;

// Re-export commonly used items
pub use elevation::{build_command, build_shell_command, elevated_command, shell_command, Elevation};
pub use error::{ErrorKind, RunAsError};
pub use identity::{FixedIdentity, Identity, ProcessIdentity};
pub use log_suppressor::LogSuppressor;
pub use output_limiter::{limit_output, OUTPUT_BUDGET, STDERR_SHARE};
pub use policy::{ExecutionPolicy, DEFAULT_CONFIG_PATH, DEFAULT_TMP_DIR};
pub use provider::{ExecutionHandle, RunAsProvider};
pub use request::{
    decode_base64, ExecutionRequest, ExecutionResult, Operation, ValidRequest, FAILURE_EXIT_CODE,
};
pub use runner::{Invocation, ProcessRunner, RunOutput, SystemProcessRunner, TIMEOUT_EXIT_CODE};
pub use script::{resolve_script_dir, ScriptFile};
