//! Error types for the synchronization module.

use thiserror::Error;

use crate::record::{RecordId, RecordVersion};

/// Errors that can occur while synchronizing a record.
///
/// `ConnectionLost`, `VersionConflict`, `SequenceGap` and `Timeout` are
/// recovered inside the record session and never reach the caller of
/// `apply`; the rest are surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The link to the authoritative service dropped.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A submission was composed against an outdated version.
    #[error("Version conflict: submitted against {base}, service is at {current}")]
    VersionConflict {
        base: RecordVersion,
        current: RecordVersion,
    },

    /// An authoritative delta skipped one or more versions.
    #[error("Sequence gap: expected {expected}, received {received}")]
    SequenceGap {
        expected: RecordVersion,
        received: RecordVersion,
    },

    /// The service reported a version older than one already confirmed.
    #[error("Version regression: confirmed {confirmed}, received {received}")]
    VersionRegression {
        confirmed: RecordVersion,
        received: RecordVersion,
    },

    /// An authoritative change could not be applied to the confirmed value.
    #[error("Local state diverged from the service: {0}")]
    Diverged(String),

    /// The service refused access to the record.
    #[error("Unauthorized access to record {0}")]
    Unauthorized(RecordId),

    /// A submission was not answered in time.
    #[error("Timed out waiting for the service")]
    Timeout,

    /// No subscription is open for the record.
    #[error("Record {0} is not subscribed")]
    NotSubscribed(RecordId),

    /// The record session stopped before answering.
    #[error("Record session for {0} is closed")]
    SessionClosed(RecordId),

    /// Command channel send error.
    #[error("Failed to send command to record session: {0}")]
    CommandSendError(String),
}

impl SyncError {
    /// Check if this error is recovered internally by the engine.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionLost(_)
                | SyncError::VersionConflict { .. }
                | SyncError::SequenceGap { .. }
                | SyncError::Timeout
        )
    }

    /// Check if this is a network/connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, SyncError::ConnectionLost(_) | SyncError::Timeout)
    }

    /// Check if this error requires fetching missed history.
    pub fn needs_resync(&self) -> bool {
        matches!(
            self,
            SyncError::SequenceGap { .. } | SyncError::VersionConflict { .. }
        )
    }

    /// Check if access was denied.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_))
    }

    /// Check if the record session is gone or was never opened.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            SyncError::SessionClosed(_)
                | SyncError::NotSubscribed(_)
                | SyncError::CommandSendError(_)
        )
    }
}

// Conversion from SyncError to the main Error type
impl From<SyncError> for crate::Error {
    fn from(err: SyncError) -> Self {
        crate::Error::Sync(err)
    }
}
