//! In-process record service.
//!
//! `MemoryService` is a complete authoritative service kept in memory. It is
//! what the simulator and the test suite run against, and it exposes fault
//! injection knobs (going offline, dropping connections, holding back
//! broadcasts, losing a delta, truncating history) to drive the engine
//! through its recovery paths.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{
    error::SyncError,
    history::UndoHistory,
    protocol::{
        Catchup, Delta, PresenceUpdate, Snapshot, StreamEvent, Submission, SubmissionId,
        SubmitResponse,
    },
    service::{RecordService, RecordStream},
};
use crate::{
    Result,
    operation::{Operation, apply_with_inverse},
    record::{ClientId, RecordId, RecordVersion},
};

struct RecordState<O: Operation> {
    value: O::Value,
    version: RecordVersion,
    /// Accepted deltas after `history_start`, in order.
    history: Vec<Delta<O>>,
    history_start: RecordVersion,
    presence: HashMap<ClientId, PresenceUpdate>,
    subscribers: Vec<mpsc::UnboundedSender<StreamEvent<O>>>,
    held: Vec<StreamEvent<O>>,
    accepted: HashMap<(ClientId, SubmissionId), RecordVersion>,
    undo: UndoHistory<O>,
    drop_next_delta: bool,
}

impl<O: Operation> RecordState<O> {
    fn new(max_undo_depth: Option<usize>) -> Self {
        Self {
            value: O::Value::default(),
            version: RecordVersion::ZERO,
            history: Vec::new(),
            history_start: RecordVersion::ZERO,
            presence: HashMap::new(),
            subscribers: Vec::new(),
            held: Vec::new(),
            accepted: HashMap::new(),
            undo: UndoHistory::new(max_undo_depth),
            drop_next_delta: false,
        }
    }

    fn snapshot(&self) -> Snapshot<O::Value> {
        Snapshot {
            value: self.value.clone(),
            version: self.version,
            presence: self.presence.values().cloned().collect(),
        }
    }

    fn deltas_after(&self, since: RecordVersion) -> Vec<Delta<O>> {
        self.history
            .iter()
            .filter(|delta| delta.version > since)
            .cloned()
            .collect()
    }

    /// Apply `ops` as the next version and broadcast the change.
    fn commit(
        &mut self,
        client: &ClientId,
        submission: Option<SubmissionId>,
        ops: Vec<O>,
        paused: bool,
    ) -> Result<(RecordVersion, Vec<O>)> {
        let (value, inverse) = apply_with_inverse(&ops, &self.value)?;
        self.value = value;
        self.version = self.version.next();
        self.undo.observe(client, &ops);

        let delta = Delta {
            version: self.version,
            client: client.clone(),
            submission,
            ops,
        };
        self.history.push(delta.clone());
        if self.drop_next_delta {
            self.drop_next_delta = false;
            debug!(version = %delta.version, "Dropping delta broadcast");
        } else {
            self.broadcast(StreamEvent::Delta(delta), paused);
        }
        Ok((self.version, inverse))
    }

    fn broadcast(&mut self, event: StreamEvent<O>, paused: bool) {
        if paused {
            self.held.push(event);
            return;
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn release_held(&mut self) {
        for event in std::mem::take(&mut self.held) {
            self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

struct ServiceState<O: Operation> {
    records: HashMap<RecordId, RecordState<O>>,
    revoked: HashSet<RecordId>,
    offline: bool,
    paused: bool,
    submit_delay: Option<Duration>,
    max_undo_depth: Option<usize>,
}

impl<O: Operation> ServiceState<O> {
    fn check_online(&self) -> Result<()> {
        if self.offline {
            return Err(SyncError::ConnectionLost("service offline".to_string()).into());
        }
        Ok(())
    }

    /// The record, created empty on first use.
    fn record(&mut self, record: &RecordId) -> Result<&mut RecordState<O>> {
        self.check_online()?;
        if self.revoked.contains(record) {
            return Err(SyncError::Unauthorized(record.clone()).into());
        }
        let max_undo_depth = self.max_undo_depth;
        Ok(self
            .records
            .entry(record.clone())
            .or_insert_with(|| RecordState::new(max_undo_depth)))
    }
}

/// Authoritative record service held in memory.
pub struct MemoryService<O: Operation> {
    state: Mutex<ServiceState<O>>,
}

impl<O: Operation> Default for MemoryService<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Operation> MemoryService<O> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServiceState {
                records: HashMap::new(),
                revoked: HashSet::new(),
                offline: false,
                paused: false,
                submit_delay: None,
                max_undo_depth: None,
            }),
        }
    }

    /// Limit the depth of the per-client undo stacks kept for server-side undo.
    pub fn with_undo_depth(self, depth: usize) -> Self {
        self.lock().max_undo_depth = Some(depth);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState<O>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse every call and end every open stream, or come back online.
    pub fn set_offline(&self, offline: bool) {
        let mut state = self.lock();
        state.offline = offline;
        if offline {
            for record in state.records.values_mut() {
                record.subscribers.clear();
            }
        }
    }

    /// Hold back stream events until unpaused. Submissions are still
    /// answered, so subscribers fall behind the service.
    pub fn set_paused(&self, paused: bool) {
        let mut state = self.lock();
        state.paused = paused;
        if !paused {
            for record in state.records.values_mut() {
                record.release_held();
            }
        }
    }

    /// Delay every submit response by `delay` after the batch was applied.
    pub fn respond_after(&self, delay: Option<Duration>) {
        self.lock().submit_delay = delay;
    }

    /// End every open stream. Subscribers have to reconnect.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        for record in state.records.values_mut() {
            record.subscribers.clear();
        }
    }

    /// Deny all further access to `record` and end its streams.
    pub fn revoke(&self, record: &RecordId) {
        let mut state = self.lock();
        state.revoked.insert(record.clone());
        if let Some(record_state) = state.records.get_mut(record) {
            record_state.subscribers.clear();
        }
    }

    /// Lose the broadcast of the next accepted change on `record`.
    pub fn drop_next_delta(&self, record: &RecordId) {
        let mut state = self.lock();
        let max_undo_depth = state.max_undo_depth;
        state
            .records
            .entry(record.clone())
            .or_insert_with(|| RecordState::new(max_undo_depth))
            .drop_next_delta = true;
    }

    /// Forget the change history of `record`; catch-up falls back to a snapshot.
    pub fn truncate_history(&self, record: &RecordId) {
        if let Some(state) = self.lock().records.get_mut(record) {
            state.history.clear();
            state.history_start = state.version;
        }
    }

    /// Current authoritative state of `record`.
    pub fn snapshot(&self, record: &RecordId) -> Option<Snapshot<O::Value>> {
        self.lock().records.get(record).map(RecordState::snapshot)
    }

    pub fn version(&self, record: &RecordId) -> RecordVersion {
        self.lock()
            .records
            .get(record)
            .map_or(RecordVersion::ZERO, |state| state.version)
    }

    pub fn subscriber_count(&self, record: &RecordId) -> usize {
        self.lock().records.get_mut(record).map_or(0, |state| {
            state.subscribers.retain(|tx| !tx.is_closed());
            state.subscribers.len()
        })
    }

    /// Server-side undo or redo for `client`.
    fn revert(
        &self,
        record: &RecordId,
        client: &ClientId,
        redo: bool,
    ) -> Result<Option<RecordVersion>> {
        let mut state = self.lock();
        let paused = state.paused;
        let record_state = state.record(record)?;
        let group = if redo {
            record_state.undo.take_redo(client)
        } else {
            record_state.undo.take_undo(client)
        };
        let Some(group) = group else {
            return Ok(None);
        };
        let (version, inverse) = record_state.commit(client, None, group, paused)?;
        if redo {
            record_state.undo.push_undo(client, inverse);
        } else {
            record_state.undo.push_redo(client, inverse);
        }
        Ok(Some(version))
    }
}

#[async_trait]
impl<O: Operation> RecordService<O> for MemoryService<O> {
    async fn subscribe(&self, record: &RecordId) -> Result<RecordStream<O>> {
        let mut state = self.lock();
        let record_state = state.record(record)?;
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is held right here, so this cannot fail.
        let _ = tx.send(StreamEvent::Snapshot(record_state.snapshot()));
        record_state.subscribers.push(tx);
        debug!(%record, version = %record_state.version, "Subscriber attached");
        Ok(rx)
    }

    async fn submit(
        &self,
        record: &RecordId,
        submission: Submission<O>,
    ) -> Result<SubmitResponse<O>> {
        let (response, delay) = {
            let mut state = self.lock();
            let paused = state.paused;
            let delay = state.submit_delay;
            let record_state = state.record(record)?;

            let key = (submission.client.clone(), submission.id);
            let response = if let Some(version) = record_state.accepted.get(&key) {
                trace!(submission = %submission.id, "Answering repeated submission");
                SubmitResponse::Accepted { version: *version }
            } else if submission.base < record_state.version {
                SubmitResponse::Rejected {
                    current: record_state.version,
                    missing: record_state.deltas_after(submission.base),
                }
            } else if submission.base > record_state.version {
                return Err(SyncError::Diverged(format!(
                    "submission based on {} but record is at {}",
                    submission.base, record_state.version
                ))
                .into());
            } else {
                let client = submission.client.clone();
                let (version, inverse) =
                    record_state.commit(&client, Some(submission.id), submission.ops, paused)?;
                record_state.undo.record(&client, inverse);
                record_state.accepted.insert(key, version);
                SubmitResponse::Accepted { version }
            };
            (response, delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }

    async fn fetch(&self, record: &RecordId, since: RecordVersion) -> Result<Catchup<O>> {
        let mut state = self.lock();
        let record_state = state.record(record)?;
        if since < record_state.history_start {
            return Ok(Catchup::Snapshot(record_state.snapshot()));
        }
        Ok(Catchup::Deltas(record_state.deltas_after(since)))
    }

    async fn publish_presence(&self, record: &RecordId, update: PresenceUpdate) -> Result<()> {
        let mut state = self.lock();
        let paused = state.paused;
        let record_state = state.record(record)?;
        let newer = record_state
            .presence
            .get(&update.client)
            .is_none_or(|known| update.seq > known.seq);
        if newer {
            record_state
                .presence
                .insert(update.client.clone(), update.clone());
            record_state.broadcast(StreamEvent::Presence(update), paused);
        }
        Ok(())
    }

    async fn leave(&self, record: &RecordId, client: &ClientId) -> Result<()> {
        let mut state = self.lock();
        let paused = state.paused;
        let record_state = state.record(record)?;
        record_state.presence.remove(client);
        record_state.undo.remove(client);
        record_state.broadcast(StreamEvent::Departed(client.clone()), paused);
        Ok(())
    }

    async fn submit_undo(
        &self,
        record: &RecordId,
        client: &ClientId,
    ) -> Result<Option<RecordVersion>> {
        self.revert(record, client, false)
    }

    async fn submit_redo(
        &self,
        record: &RecordId,
        client: &ClientId,
    ) -> Result<Option<RecordVersion>> {
        self.revert(record, client, true)
    }
}
