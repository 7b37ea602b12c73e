//! Message types exchanged with the authoritative record service.
//!
//! These are transport-agnostic: a network transport serializes them, the
//! in-process [`MemoryService`](super::memory::MemoryService) passes them
//! through channels as they are.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    operation::Operation,
    record::{ClientId, RecordVersion, Selection},
};

/// Identifies one batch submitted by a record session.
///
/// A session reuses the id when it resends a batch whose outcome it never
/// learned, so the service must answer a repeated id with the original result.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubmissionId(u64);

impl SubmissionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A batch of local operations composed against `base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission<O> {
    pub id: SubmissionId,
    pub client: ClientId,
    pub base: RecordVersion,
    pub ops: Vec<O>,
}

/// One accepted change, as assigned a version by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta<O> {
    pub version: RecordVersion,
    pub client: ClientId,
    /// Present when the change came from a `submit`; absent for changes the
    /// service originated itself, such as server-side undo.
    pub submission: Option<SubmissionId>,
    pub ops: Vec<O>,
}

/// A client's selection, stamped with a per-client sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub client: ClientId,
    pub selection: Option<Selection>,
    /// Strictly increasing per client, starting at 1.
    pub seq: u64,
}

/// Full state of a record at `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<V> {
    pub value: V,
    pub version: RecordVersion,
    pub presence: Vec<PresenceUpdate>,
}

/// Events delivered on a record stream. The first event is always a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "O: Serialize, O::Value: Serialize",
    deserialize = "O: DeserializeOwned, O::Value: DeserializeOwned"
))]
pub enum StreamEvent<O: Operation> {
    Snapshot(Snapshot<O::Value>),
    Delta(Delta<O>),
    Presence(PresenceUpdate),
    /// The client's session ended; its presence must be dropped.
    Departed(ClientId),
}

/// The service's answer to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubmitResponse<O> {
    Accepted {
        version: RecordVersion,
    },
    /// `base` was outdated. `missing` holds the deltas after `base` up to
    /// `current`, possibly truncated.
    Rejected {
        current: RecordVersion,
        missing: Vec<Delta<O>>,
    },
}

/// History needed to catch up from a given version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "O: Serialize, O::Value: Serialize",
    deserialize = "O: DeserializeOwned, O::Value: DeserializeOwned"
))]
pub enum Catchup<O: Operation> {
    /// Every delta after the requested version, in order.
    Deltas(Vec<Delta<O>>),
    /// The history is no longer available; only the current state is.
    Snapshot(Snapshot<O::Value>),
}
