//! CLI argument definitions for the recsync binary.

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use recsync::{EngineConfig, UndoMode};

/// Where undo and redo are computed
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UndoModeArg {
    /// Each engine keeps its own undo stacks (default)
    Client,
    /// The service reverts changes on request
    Server,
}

impl From<UndoModeArg> for UndoMode {
    fn from(mode: UndoModeArg) -> Self {
        match mode {
            UndoModeArg::Client => UndoMode::ClientSide,
            UndoModeArg::Server => UndoMode::Server,
        }
    }
}

/// Optimistic record synchronization toolkit
#[derive(Parser, Debug)]
#[command(name = "recsync")]
#[command(about = "recsync: optimistic record synchronization with undo and presence")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run several clients editing one record against an in-process service
    Simulate(SimulateArgs),
}

/// Arguments for the simulate command
#[derive(clap::Args, Debug)]
pub struct SimulateArgs {
    /// Number of clients, each with its own engine
    #[arg(short, long, default_value_t = 3, env = "RECSYNC_CLIENTS")]
    pub clients: usize,

    /// Number of rounds; every client acts once per round
    #[arg(short, long, default_value_t = 50, env = "RECSYNC_ROUNDS")]
    pub rounds: usize,

    /// Seed for the random edits. Random when omitted.
    #[arg(short, long, env = "RECSYNC_SEED")]
    pub seed: Option<u64>,

    /// Drop every connection after each N rounds (0 never drops)
    #[arg(long, default_value_t = 0, env = "RECSYNC_DROP_EVERY")]
    pub drop_every: usize,

    /// Seconds to wait for all clients to converge
    #[arg(long, default_value_t = 30, env = "RECSYNC_SETTLE_TIMEOUT")]
    pub settle_timeout: u64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Engine tuning shared by every simulated client
#[derive(clap::Args, Debug)]
pub struct EngineArgs {
    /// First reconnect delay in milliseconds
    #[arg(long, default_value_t = 50, env = "RECSYNC_INITIAL_BACKOFF_MS")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    #[arg(long, default_value_t = 1000, env = "RECSYNC_MAX_BACKOFF_MS")]
    pub max_backoff_ms: u64,

    /// Give up after this many failed reconnects. Unbounded when omitted.
    #[arg(long, env = "RECSYNC_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: Option<u32>,

    /// Submit timeout in milliseconds
    #[arg(long, default_value_t = 5000, env = "RECSYNC_SUBMIT_TIMEOUT_MS")]
    pub submit_timeout_ms: u64,

    /// Undo strategy
    #[arg(long, default_value = "client", env = "RECSYNC_UNDO_MODE")]
    pub undo_mode: UndoModeArg,

    /// Maximum undo groups kept per client
    #[arg(long, default_value_t = 200, env = "RECSYNC_MAX_UNDO_DEPTH")]
    pub max_undo_depth: usize,
}

impl EngineArgs {
    pub fn to_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_backoff(
                Duration::from_millis(self.initial_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            )
            .with_max_reconnect_attempts(self.max_reconnect_attempts)
            .with_submit_timeout(Duration::from_millis(self.submit_timeout_ms))
            .with_undo_mode(self.undo_mode.into())
            .with_max_undo_depth(Some(self.max_undo_depth))
    }
}
