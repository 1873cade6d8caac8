//! Elevation command builder
//!
//! Turns a raw command into the command line that is actually executed:
//! optionally wrapped in a shell invocation and/or escalated through sudo.
//! Both builders are pure string transformations.

use std::str::FromStr;

use crate::error::RunAsError;

/// Shell used for shell commands and elevated commands
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Elevation directive attached to a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Elevation {
    /// Run as the current identity
    #[default]
    None,
    /// Escalate through `sudo`
    Sudo,
}

impl Elevation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Elevation::None => "",
            Elevation::Sudo => "sudo",
        }
    }

    /// Parse an optional request token; a missing token means no elevation.
    pub fn from_token(token: Option<&str>) -> Result<Self, RunAsError> {
        token.map_or(Ok(Elevation::None), str::parse)
    }
}

impl FromStr for Elevation {
    type Err = RunAsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" => Ok(Elevation::None),
            "sudo" => Ok(Elevation::Sudo),
            _ => Err(RunAsError::UnsupportedElevation(s.to_string())),
        }
    }
}

impl std::fmt::Display for Elevation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wrap a command so it runs through the shell.
///
/// The command is placed between single quotes without escaping, so a
/// command containing `'` produces a broken command line.
pub fn shell_command(command: &str) -> String {
    format!("{} -c '{}'", DEFAULT_SHELL, command)
}

/// Wrap a command so it runs through the shell as the superuser.
///
/// Single quotes in `command` are escaped, so an already shell-wrapped
/// command nests correctly. `-n` keeps sudo from prompting for a password.
pub fn elevated_command(command: &str) -> String {
    let escaped = command.replace('\'', "'\\''");
    format!("sudo -n {} -c '{}'", DEFAULT_SHELL, escaped)
}

/// Build the command line for a raw command (or a script invocation).
pub fn build_command(command: &str, elevation: Elevation) -> String {
    match elevation {
        Elevation::Sudo => elevated_command(command),
        Elevation::None => command.to_string(),
    }
}

/// Build the command line for a shell command.
///
/// The shell wrap always happens; with sudo the shell command is elevated
/// on top of that, even when the caller is already privileged.
pub fn build_shell_command(command: &str, elevation: Elevation) -> String {
    let shell = shell_command(command);
    match elevation {
        Elevation::Sudo => elevated_command(&shell),
        Elevation::None => shell,
    }
}
