//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where undo history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoMode {
    /// Each record session keeps per-client undo stacks and submits the
    /// inverse operations like any other edit.
    #[default]
    ClientSide,
    /// Undo and redo are delegated to the service.
    Server,
}

/// Tuning knobs shared by every record session of an engine.
///
/// Durations are stored in milliseconds so the config can be read from any
/// serde format; use the accessors to get [`Duration`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// First reconnect delay; doubled on every failed attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound of the reconnect delay.
    pub max_backoff_ms: u64,
    /// Give up and report `Disconnected` after this many failed attempts.
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// A submission without an answer after this long is treated as a lost
    /// connection.
    pub submit_timeout_ms: u64,
    /// Capacity of each record session's command channel.
    pub command_capacity: usize,
    pub undo_mode: UndoMode,
    /// Undo groups kept per client. `None` is unbounded.
    pub max_undo_depth: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_reconnect_attempts: None,
            submit_timeout_ms: 10_000,
            command_capacity: 100,
            undo_mode: UndoMode::ClientSide,
            max_undo_depth: Some(200),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    /// Delay before reconnect attempt `attempt` (starting at 1):
    /// `min(initial * 2^(attempt - 1), max)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    pub fn with_undo_mode(mut self, mode: UndoMode) -> Self {
        self.undo_mode = mode;
        self
    }

    pub fn with_max_undo_depth(mut self, depth: Option<usize>) -> Self {
        self.max_undo_depth = depth;
        self
    }
}
