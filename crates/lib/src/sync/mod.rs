//! Synchronization of records with an authoritative service.
//!
//! The components here are leaves of the [`RecordEngine`](crate::engine::RecordEngine):
//!
//! - [`clock`]: the last confirmed version and gap detection.
//! - [`buffer`]: optimistic local operations and their reconciliation.
//! - [`history`]: per-client undo and redo.
//! - [`presence`]: other clients' selections.
//! - [`protocol`] and [`service`]: the contract with the authoritative service.
//! - [`memory`]: an in-process implementation of that service.
//!
//! A record session ties them together behind a single update queue per record.

pub mod buffer;
pub mod clock;
pub mod error;
pub mod history;
pub mod memory;
pub mod presence;
pub mod protocol;
pub mod service;
pub(crate) mod session;

pub use buffer::{BufferPhase, OperationBuffer};
pub use clock::VersionClock;
pub use error::SyncError;
pub use history::{UndoHistory, UndoStack};
pub use memory::MemoryService;
pub use presence::CursorRegistry;
pub use protocol::{
    Catchup, Delta, PresenceUpdate, Snapshot, StreamEvent, Submission, SubmissionId,
    SubmitResponse,
};
pub use service::{RecordService, RecordStream};
pub use session::RecordListener;
