//! Operation buffer: optimistic local edits awaiting confirmation.
//!
//! The buffer keeps the last confirmed value and every local operation that
//! has not been confirmed yet, split into at most one batch in flight and a
//! queue behind it. Replaying the in-flight batch and then the queue over the
//! confirmed value always reproduces the visible value.
//!
//! When an authoritative change from someone else arrives, the pending
//! operations are rebased over it (pending -> reconciling) and the in-flight
//! batch is resent once the service rejects the stale attempt (reconciling ->
//! applied). Nothing pending is dropped on a conflict.

use std::collections::VecDeque;

use tracing::{trace, warn};

use super::{
    clock::{Advance, VersionClock},
    error::SyncError,
    protocol::{Delta, Submission, SubmissionId},
};
use crate::{
    operation::{
        Operation, OperationError, Side, apply_all, apply_with_inverse, compose_all,
        transform_all,
    },
    record::{ClientId, RecordVersion},
};

/// Where the buffer stands in the submit/confirm cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPhase {
    /// Nothing unconfirmed.
    Idle,
    /// Unconfirmed operations waiting to be sent.
    Pending,
    /// A batch was sent and no other change has been confirmed since.
    AwaitingAck,
    /// The in-flight batch was overtaken by another change and rebased; the
    /// service will reject it and it must be resent.
    Reconciling,
}

/// Transmission state of the in-flight batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightStatus {
    /// Must be (re)sent.
    Unsent,
    Sent,
    /// Sent, but the link dropped before an answer. Resent under the same id.
    Uncertain,
}

/// One `apply` call's operations, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch<O> {
    pub client: ClientId,
    /// Version the operations are currently expressed against.
    pub base: RecordVersion,
    pub ops: Vec<O>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InFlight<O> {
    pub id: SubmissionId,
    pub client: ClientId,
    pub base: RecordVersion,
    pub ops: Vec<O>,
    pub status: FlightStatus,
    /// Incremented on every send so stale answers can be told apart.
    pub attempt: u32,
}

/// Result of folding one authoritative delta.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome<O> {
    /// Someone else's change. `visible` is that change rebased over the
    /// pending local operations: exactly what changed in the visible value.
    Applied { client: ClientId, visible: Vec<O> },
    /// The delta is our own in-flight batch coming back.
    Acknowledged { id: SubmissionId, client: ClientId },
    /// Already confirmed.
    Ignored,
}

pub struct OperationBuffer<O: Operation> {
    clock: VersionClock,
    confirmed: O::Value,
    visible: O::Value,
    in_flight: Option<InFlight<O>>,
    queued: VecDeque<PendingBatch<O>>,
    rebased: bool,
}

impl<O: Operation> Default for OperationBuffer<O> {
    fn default() -> Self {
        Self::new()
    }
}

fn diverged(err: OperationError) -> SyncError {
    SyncError::Diverged(err.to_string())
}

impl<O: Operation> OperationBuffer<O> {
    /// An empty buffer over the version-zero value.
    pub fn new() -> Self {
        Self::from_snapshot(O::Value::default(), RecordVersion::ZERO)
    }

    pub fn from_snapshot(value: O::Value, version: RecordVersion) -> Self {
        Self {
            clock: VersionClock::new(version),
            confirmed: value.clone(),
            visible: value,
            in_flight: None,
            queued: VecDeque::new(),
            rebased: false,
        }
    }

    /// Last confirmed version.
    pub fn version(&self) -> RecordVersion {
        self.clock.confirmed()
    }

    /// Confirmed value with every pending operation applied.
    pub fn visible(&self) -> &O::Value {
        &self.visible
    }

    pub fn confirmed_value(&self) -> &O::Value {
        &self.confirmed
    }

    pub fn in_flight(&self) -> Option<&InFlight<O>> {
        self.in_flight.as_ref()
    }

    pub fn queued(&self) -> impl Iterator<Item = &PendingBatch<O>> {
        self.queued.iter()
    }

    pub fn has_pending(&self) -> bool {
        self.in_flight.is_some() || !self.queued.is_empty()
    }

    /// True before anything was confirmed or issued.
    pub fn is_pristine(&self) -> bool {
        self.version() == RecordVersion::ZERO && !self.has_pending()
    }

    pub fn phase(&self) -> BufferPhase {
        match &self.in_flight {
            Some(flight) if flight.status == FlightStatus::Sent => {
                if self.rebased {
                    BufferPhase::Reconciling
                } else {
                    BufferPhase::AwaitingAck
                }
            }
            Some(_) => BufferPhase::Pending,
            None if self.queued.is_empty() => BufferPhase::Idle,
            None => BufferPhase::Pending,
        }
    }

    /// Every unconfirmed operation in issue order.
    pub fn pending_ops(&self) -> Vec<O> {
        self.in_flight
            .iter()
            .flat_map(|flight| flight.ops.iter())
            .chain(self.queued.iter().flat_map(|batch| batch.ops.iter()))
            .cloned()
            .collect()
    }

    /// Replay the pending operations over the confirmed value.
    pub fn replay(&self) -> Result<O::Value, OperationError> {
        apply_all(&self.pending_ops(), &self.confirmed)
    }

    /// Apply `ops` optimistically and queue them for transmission.
    ///
    /// Returns the group that reverts them. On error nothing changes.
    pub fn apply_local(
        &mut self,
        client: &ClientId,
        ops: Vec<O>,
    ) -> Result<Vec<O>, OperationError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let (visible, inverse) = apply_with_inverse(&ops, &self.visible)?;
        self.visible = visible;
        self.queued.push_back(PendingBatch {
            client: client.clone(),
            base: self.version(),
            ops,
        });
        Ok(inverse)
    }

    /// The next batch to send, if nothing is awaiting an answer.
    ///
    /// An in-flight batch that must be resent comes first, under its original
    /// id. Otherwise the head of the queue becomes the in-flight batch,
    /// together with every directly following batch of the same client.
    pub fn next_submission(
        &mut self,
        next_id: impl FnOnce() -> SubmissionId,
    ) -> Option<Submission<O>> {
        let base = self.version();

        if let Some(flight) = &self.in_flight {
            match flight.status {
                FlightStatus::Sent => return None,
                _ if flight.ops.is_empty() => {
                    // Everything it did was already done by someone else.
                    trace!(submission = %flight.id, "Dropping in-flight batch emptied by rebase");
                    self.in_flight = None;
                }
                _ => {}
            }
        }

        if let Some(flight) = &mut self.in_flight {
            flight.status = FlightStatus::Sent;
            flight.base = base;
            flight.attempt += 1;
            self.rebased = false;
            return Some(Submission {
                id: flight.id,
                client: flight.client.clone(),
                base,
                ops: flight.ops.clone(),
            });
        }

        while self.queued.front().is_some_and(|batch| batch.ops.is_empty()) {
            self.queued.pop_front();
        }
        let first = self.queued.pop_front()?;
        let client = first.client;
        let mut ops = first.ops;
        while self
            .queued
            .front()
            .is_some_and(|batch| batch.client == client)
        {
            if let Some(batch) = self.queued.pop_front() {
                ops.extend(batch.ops);
            }
        }
        let ops = compose_all(ops);
        let id = next_id();

        self.in_flight = Some(InFlight {
            id,
            client: client.clone(),
            base,
            ops: ops.clone(),
            status: FlightStatus::Sent,
            attempt: 1,
        });
        self.rebased = false;
        Some(Submission {
            id,
            client,
            base,
            ops,
        })
    }

    /// True if `id`/`attempt` names the in-flight batch as last sent.
    pub fn is_current_attempt(&self, id: SubmissionId, attempt: u32) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|flight| flight.id == id && flight.attempt == attempt)
    }

    /// Confirm the in-flight batch at `version`.
    ///
    /// Returns `false` when the answer is stale: the batch was already
    /// confirmed through the stream.
    pub fn acknowledge(
        &mut self,
        id: SubmissionId,
        version: RecordVersion,
    ) -> Result<bool, SyncError> {
        let Some(flight) = self.in_flight.as_ref().filter(|flight| flight.id == id) else {
            return Ok(false);
        };
        if self.clock.check(version)? == Advance::Stale {
            // Accepted before an adopted snapshot, which already contains it.
            trace!(submission = %id, %version, "Batch is part of the confirmed state");
            self.in_flight = None;
            self.rebased = false;
            self.rebuild_visible();
            return Ok(true);
        }
        let confirmed = apply_all(&flight.ops, &self.confirmed).map_err(diverged)?;
        self.clock.advance(version)?;
        self.confirmed = confirmed;
        self.in_flight = None;
        self.rebased = false;
        Ok(true)
    }

    /// Fold one authoritative delta, in version order.
    ///
    /// A delta carrying the in-flight submission id confirms that batch.
    /// Any other delta becomes the new confirmed base, and every pending
    /// operation is rebased over it. Nothing changes on error.
    pub fn apply_remote(&mut self, delta: Delta<O>) -> Result<RemoteOutcome<O>, SyncError> {
        if self.clock.check(delta.version)? == Advance::Stale {
            return Ok(RemoteOutcome::Ignored);
        }

        if let (Some(id), Some(flight)) = (delta.submission, &self.in_flight)
            && flight.id == id
            && flight.client == delta.client
        {
            self.confirmed = apply_all(&delta.ops, &self.confirmed).map_err(diverged)?;
            self.clock.advance(delta.version)?;
            self.in_flight = None;
            self.rebased = false;
            return Ok(RemoteOutcome::Acknowledged {
                id,
                client: delta.client,
            });
        }

        let confirmed = apply_all(&delta.ops, &self.confirmed).map_err(diverged)?;

        // Authoritative operations win ties, so pending work takes the right side.
        let mut remote = delta.ops;
        let mut in_flight = self.in_flight.clone();
        if let Some(flight) = &mut in_flight {
            let (ops, rest) = transform_all(&flight.ops, &remote, Side::Right);
            flight.ops = ops;
            flight.base = delta.version;
            remote = rest;
        }
        let mut queued = self.queued.clone();
        for batch in &mut queued {
            let (ops, rest) = transform_all(&batch.ops, &remote, Side::Right);
            batch.ops = ops;
            batch.base = delta.version;
            remote = rest;
        }
        let visible = apply_all(&remote, &self.visible).map_err(diverged)?;

        self.clock.advance(delta.version)?;
        if in_flight
            .as_ref()
            .is_some_and(|flight| flight.status == FlightStatus::Sent)
        {
            self.rebased = true;
        }
        trace!(
            version = %delta.version,
            client = %delta.client,
            pending = queued.len() + usize::from(in_flight.is_some()),
            "Rebased pending operations over remote change"
        );
        self.confirmed = confirmed;
        self.visible = visible;
        self.in_flight = in_flight;
        self.queued = queued;

        Ok(RemoteOutcome::Applied {
            client: delta.client,
            visible: remote,
        })
    }

    /// The service rejected attempt `attempt` of the in-flight batch; it will
    /// be resent once the missing history has been folded in.
    pub fn mark_rejected(&mut self, id: SubmissionId, attempt: u32) -> bool {
        match &mut self.in_flight {
            Some(flight)
                if flight.id == id
                    && flight.attempt == attempt
                    && flight.status == FlightStatus::Sent =>
            {
                flight.status = FlightStatus::Unsent;
                self.rebased = false;
                true
            }
            _ => false,
        }
    }

    /// The link dropped while a batch was awaiting an answer.
    pub fn mark_uncertain(&mut self) {
        if let Some(flight) = &mut self.in_flight
            && flight.status == FlightStatus::Sent
        {
            flight.status = FlightStatus::Uncertain;
            self.rebased = false;
        }
    }

    /// Forget the in-flight batch after the service refused it as invalid.
    pub fn drop_in_flight(&mut self) -> Option<InFlight<O>> {
        let flight = self.in_flight.take();
        self.rebased = false;
        self.rebuild_visible();
        flight
    }

    /// Replace the confirmed state with a full snapshot when the history
    /// between the confirmed version and the snapshot is unavailable.
    ///
    /// Pending operations are replayed over the snapshot as they are; batches
    /// that no longer apply are dropped. Returns how many were dropped.
    pub fn adopt_snapshot(
        &mut self,
        value: O::Value,
        version: RecordVersion,
    ) -> Result<usize, SyncError> {
        self.clock.jump_to(version)?;
        self.confirmed = value;
        self.mark_uncertain();
        for batch in &mut self.queued {
            batch.base = version;
        }
        Ok(self.rebuild_visible())
    }

    /// Drop everything not yet transmitted. A batch that was already sent is
    /// kept: its answer may still arrive. Returns the number of operations dropped.
    pub fn discard_unsent(&mut self) -> usize {
        let mut dropped: usize = self.queued.drain(..).map(|batch| batch.ops.len()).sum();
        if self
            .in_flight
            .as_ref()
            .is_some_and(|flight| flight.status == FlightStatus::Unsent)
        {
            dropped += self.in_flight.take().map_or(0, |flight| flight.ops.len());
        }
        self.rebuild_visible();
        dropped
    }

    fn rebuild_visible(&mut self) -> usize {
        let mut value = self.confirmed.clone();
        let mut dropped = 0;

        let flight_result = self
            .in_flight
            .as_ref()
            .map(|flight| apply_all(&flight.ops, &value));
        match flight_result {
            Some(Ok(next)) => value = next,
            Some(Err(e)) => {
                warn!("Dropping in-flight batch that no longer applies: {e}");
                self.in_flight = None;
                dropped += 1;
            }
            None => {}
        }

        self.queued
            .retain(|batch| match apply_all(&batch.ops, &value) {
                Ok(next) => {
                    value = next;
                    true
                }
                Err(e) => {
                    warn!(
                        client = %batch.client,
                        "Dropping pending batch that no longer applies: {e}"
                    );
                    dropped += 1;
                    false
                }
            });

        self.visible = value;
        dropped
    }
}
