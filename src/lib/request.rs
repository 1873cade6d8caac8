//! Requests and results exchanged with the executors
//!
//! An [`ExecutionRequest`] is the loosely typed record a transport hands
//! over; [`ExecutionRequest::validate`] turns it into a [`ValidRequest`] or
//! rejects it before anything runs.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::elevation::Elevation;
use crate::error::RunAsError;

/// Which executor a request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Command,
    ShellCommand,
    Script,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Command => "ExecuteCommand",
            Operation::ShellCommand => "ExecuteShellCommand",
            Operation::Script => "ExecuteScript",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request fields as received from a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Command text or script text
    pub body: Option<String>,
    /// Script arguments
    pub arguments: Option<String>,
    pub timeout_seconds: Option<u32>,
    /// `""` or `"sudo"`, case-insensitive
    pub elevation: Option<String>,
    pub is_base64_encoded: Option<bool>,
}

impl ExecutionRequest {
    pub fn new(body: &str, timeout_seconds: u32) -> Self {
        ExecutionRequest {
            body: Some(body.to_string()),
            timeout_seconds: Some(timeout_seconds),
            ..Default::default()
        }
    }

    pub fn with_arguments(mut self, arguments: &str) -> Self {
        self.arguments = Some(arguments.to_string());
        self
    }

    pub fn with_elevation(mut self, elevation: &str) -> Self {
        self.elevation = Some(elevation.to_string());
        self
    }

    pub fn base64_encoded(mut self) -> Self {
        self.is_base64_encoded = Some(true);
        self
    }

    /// Check required fields and the elevation token.
    pub fn validate(&self) -> Result<ValidRequest, RunAsError> {
        let body = match self.body.as_deref() {
            Some(body) if !body.is_empty() => body.to_string(),
            _ => return Err(RunAsError::MissingField("body")),
        };
        let timeout_seconds = self
            .timeout_seconds
            .ok_or(RunAsError::MissingField("timeoutSeconds"))?;
        let elevation = Elevation::from_token(self.elevation.as_deref())?;

        Ok(ValidRequest {
            body,
            arguments: self.arguments.clone().unwrap_or_default(),
            timeout_seconds,
            elevation,
            base64: self.is_base64_encoded.unwrap_or(false),
        })
    }
}

/// A request whose fields passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRequest {
    pub body: String,
    pub arguments: String,
    pub timeout_seconds: u32,
    pub elevation: Elevation,
    pub base64: bool,
}

/// Outcome of one execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// `true` iff `exit_code == 0`
    pub succeeded: bool,
    /// `-1` when the process never reported a code
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Exit code reported when execution failed before a process produced one
pub const FAILURE_EXIT_CODE: i32 = -1;

impl ExecutionResult {
    pub fn new(exit_code: i32, stdout: String, stderr: String) -> Self {
        ExecutionResult {
            succeeded: exit_code == 0,
            exit_code,
            stdout,
            stderr,
        }
    }

    /// Failure result for an execution that never got an exit code
    pub fn failure(stdout: String, stderr: String) -> Self {
        Self::new(FAILURE_EXIT_CODE, stdout, stderr)
    }
}

/// Decode a base64 payload (standard alphabet, padded). ASCII whitespace is
/// ignored so line-wrapped payloads decode; invalid UTF-8 is replaced.
pub fn decode_base64(encoded: &str) -> Result<String, RunAsError> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64.decode(compact)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
