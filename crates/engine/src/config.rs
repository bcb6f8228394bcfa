use std::path::PathBuf;
use std::time::Duration;

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Poll cadence for in-flight generation jobs, in milliseconds.
    pub poll_interval_ms: u64,
    /// Trailing-edge debounce window for buffered edits, in milliseconds.
    pub debounce_ms: u64,
    /// Consecutive transport failures a poller tolerates before giving up.
    pub max_poll_failures: u32,
    /// Where the elapsed-time ledger is persisted. `None` keeps it in
    /// memory only.
    pub ledger_path: Option<PathBuf>,
}

impl EngineConfig {
    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            debounce_ms: 1_000,
            max_poll_failures: 5,
            ledger_path: None,
        }
    }
}
