//!
//! recsync: optimistic record synchronization over an authoritative service.
//!
//! The engine keeps a locally held copy of each subscribed record consistent
//! with a remote service that orders every change, while local edits are
//! applied immediately, undone and redone, and other clients edit the same
//! record concurrently.
//!
//! ## Core Concepts
//!
//! * **Records (`record::Record`)**: The unit of subscription: a value, the last
//!   confirmed version, and the selections of every present client.
//! * **Operations (`operation::Operation`)**: Invertible, transformable edits. The
//!   engine is parametric over them; `operation::text::TextOp` edits plain text.
//! * **Record service (`sync::RecordService`)**: The authoritative collaborator that
//!   assigns versions and streams accepted changes. `sync::MemoryService` is an
//!   in-process implementation.
//! * **Engine (`engine::RecordEngine`)**: Owns one record session per subscribed
//!   record and routes commands from any number of local clients to it.

pub mod config;
pub mod engine;
pub mod operation;
pub mod record;
pub mod sync;

pub use config::{EngineConfig, UndoMode};
pub use engine::{RecordEngine, Subscription};
pub use operation::{Operation, OperationError, Side};
pub use record::{
    ClientId, ConnectionStatus, Record, RecordId, RecordVersion, RecordView, Selection,
    SharedRecord,
};
pub use sync::SyncError;

/// Result type used throughout the recsync library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the recsync library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Structured synchronization errors from the sync module
    #[error(transparent)]
    Sync(sync::SyncError),

    /// Structured operation errors from the operation module
    #[error(transparent)]
    Operation(operation::OperationError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Sync(_) => "sync",
            Error::Operation(_) => "operation",
        }
    }

    /// Check if this error is recovered internally and never surfaced by `apply`.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_transient(),
            Error::Operation(_) => false,
        }
    }

    /// Check if this error is a network/connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_connection_error(),
            Error::Operation(_) => false,
        }
    }

    /// Check if access to the record was denied.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_unauthorized(),
            Error::Operation(_) => false,
        }
    }

    /// Check if an operation did not fit the value it was applied to.
    pub fn is_invalid_operation(&self) -> bool {
        match self {
            Error::Operation(op_err) => op_err.is_invalid_operation(),
            Error::Sync(_) => false,
        }
    }

    /// Check if the requested capability is not offered.
    pub fn is_unsupported(&self) -> bool {
        match self {
            Error::Operation(op_err) => op_err.is_unsupported(),
            Error::Sync(_) => false,
        }
    }

    /// Check if the record is not subscribed or its session has stopped.
    pub fn is_closed(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_closed(),
            Error::Operation(_) => false,
        }
    }
}
