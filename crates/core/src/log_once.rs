//! Suppression of repeated warnings for persistent conditions.

use dashmap::DashSet;

/// Remembers which conditions have already been logged by this process.
///
/// Built once at start-up and shared by reference; a key is reported the
/// first time it is seen and ignored afterwards.
#[derive(Debug, Default)]
pub struct LogOnce {
    seen: DashSet<String>,
}

impl LogOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `key` is passed.
    pub fn first_time(&self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        self.seen.insert(key.to_string())
    }

    /// Emit a warning for `key` unless one was already emitted.
    pub fn warn(&self, key: &str, message: &str) {
        if self.first_time(key) {
            tracing::warn!(condition = %key, "{}", message);
        }
    }

    /// Forget `key` so the next occurrence is reported again (the condition cleared).
    pub fn reset(&self, key: &str) {
        self.seen.remove(key);
    }
}
