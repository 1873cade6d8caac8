//! Rate-limited warnings
//!
//! A condition that repeats on every call (a missing directory, say) should
//! not flood the log. The first occurrence of a key is reported at warning
//! level; repeats inside the suppression window drop to trace level.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default length of the suppression window
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Level a suppressed event should be emitted at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Trace,
}

#[derive(Debug)]
pub struct LogSuppressor {
    window: Duration,
    last_warned: Mutex<HashMap<String, Instant>>,
}

impl Default for LogSuppressor {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPRESSION_WINDOW)
    }
}

impl LogSuppressor {
    pub fn new(window: Duration) -> Self {
        LogSuppressor {
            window,
            last_warned: Mutex::new(HashMap::new()),
        }
    }

    /// Severity for this occurrence of `key`, recording it when it warns.
    pub fn severity(&self, key: &str) -> Severity {
        let now = Instant::now();
        // A poisoned map only loses suppression history
        let mut last_warned = match self.last_warned.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match last_warned.get(key) {
            Some(at) if now.duration_since(*at) < self.window => Severity::Trace,
            _ => {
                last_warned.insert(key.to_string(), now);
                Severity::Warning
            }
        }
    }

    /// Emit `message` at the severity chosen for `key`.
    pub fn log(&self, key: &str, message: &str) {
        match self.severity(key) {
            Severity::Warning => tracing::warn!(key, "{}", message),
            Severity::Trace => tracing::trace!(key, suppressed = true, "{}", message),
        }
    }
}
