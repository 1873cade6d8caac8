//! Identity of the process issuing executions

use std::env;

/// Answers "who is running this?" for the policy gate.
pub trait Identity: Send + Sync {
    /// Whether the effective identity is the superuser
    fn is_root(&self) -> bool;

    /// Name used in diagnostics
    fn user_name(&self) -> String;
}

/// The effective identity of the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessIdentity;

impl Identity for ProcessIdentity {
    #[cfg(unix)]
    fn is_root(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    fn is_root(&self) -> bool {
        false
    }

    fn user_name(&self) -> String {
        if self.is_root() {
            return "root".to_string();
        }
        env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| effective_uid_label())
    }
}

#[cfg(unix)]
fn effective_uid_label() -> String {
    // SAFETY: see is_root
    format!("uid {}", unsafe { libc::geteuid() })
}

#[cfg(not(unix))]
fn effective_uid_label() -> String {
    "unknown".to_string()
}

/// Identity with a fixed answer, for composing providers in tests and tools
#[derive(Debug, Clone)]
pub struct FixedIdentity {
    pub root: bool,
    pub name: String,
}

impl FixedIdentity {
    pub fn root() -> Self {
        FixedIdentity {
            root: true,
            name: "root".to_string(),
        }
    }

    pub fn user(name: &str) -> Self {
        FixedIdentity {
            root: false,
            name: name.to_string(),
        }
    }
}

impl Identity for FixedIdentity {
    fn is_root(&self) -> bool {
        self.root
    }

    fn user_name(&self) -> String {
        self.name.clone()
    }
}
