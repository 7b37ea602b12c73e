//! The seam between a record session and the authoritative record service.
//!
//! A service assigns versions, rejects submissions composed against outdated
//! versions, streams accepted changes and presence to every subscriber, and
//! answers catch-up requests. Implementations decide how the messages in
//! [`protocol`](super::protocol) travel; the engine only talks to this trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::protocol::{Catchup, PresenceUpdate, StreamEvent, Submission, SubmitResponse};
use crate::{
    Result,
    operation::{Operation, OperationError},
    record::{ClientId, RecordId, RecordVersion},
};

/// Live stream of one record. The stream ending means the connection dropped.
pub type RecordStream<O> = mpsc::UnboundedReceiver<StreamEvent<O>>;

/// Authoritative source of truth for records edited with operations `O`.
///
/// Errors are classified by the session: connection errors trigger a
/// reconnect, [`SyncError::Unauthorized`](super::SyncError::Unauthorized)
/// stops the session, and an [`OperationError`] from `submit` means the
/// service refused the batch itself.
#[async_trait]
pub trait RecordService<O: Operation>: Send + Sync + 'static {
    /// Open a stream of `record`. The first event must be a snapshot.
    async fn subscribe(&self, record: &RecordId) -> Result<RecordStream<O>>;

    /// Submit a batch composed against `submission.base`.
    ///
    /// A repeated submission id from the same client must be answered with
    /// the original outcome without applying the batch again.
    async fn submit(
        &self,
        record: &RecordId,
        submission: Submission<O>,
    ) -> Result<SubmitResponse<O>>;

    /// Every accepted change after `since`, or a snapshot when that history
    /// is no longer available.
    async fn fetch(&self, record: &RecordId, since: RecordVersion) -> Result<Catchup<O>>;

    /// Publish a client's selection to every other subscriber.
    async fn publish_presence(&self, record: &RecordId, update: PresenceUpdate) -> Result<()>;

    /// A local client stopped editing `record`.
    async fn leave(&self, _record: &RecordId, _client: &ClientId) -> Result<()> {
        Ok(())
    }

    /// Revert the client's most recent change on the service's side.
    ///
    /// Returns the version of the resulting change, or `None` when the client
    /// has nothing to undo.
    async fn submit_undo(
        &self,
        _record: &RecordId,
        _client: &ClientId,
    ) -> Result<Option<RecordVersion>> {
        Err(OperationError::Unsupported("server-side undo").into())
    }

    /// Reapply the client's most recently undone change on the service's side.
    async fn submit_redo(
        &self,
        _record: &RecordId,
        _client: &ClientId,
    ) -> Result<Option<RecordVersion>> {
        Err(OperationError::Unsupported("server-side redo").into())
    }
}
