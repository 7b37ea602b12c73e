//! The session's side of the link to the service: connecting, reconnecting
//! with backoff, submitting, and catching up after a gap.

use std::future::pending;

use tokio::time::{Instant, sleep_until, timeout};
use tracing::{Instrument, debug, info, trace, warn};

use super::RecordSession;
use crate::{
    Error, Result,
    operation::Operation,
    record::{ClientId, ConnectionStatus, RecordVersion, Selection},
    sync::{
        error::SyncError,
        protocol::{Catchup, PresenceUpdate, Snapshot, StreamEvent, SubmissionId, SubmitResponse},
        service::RecordStream,
    },
};

/// Answers from tasks spawned by the session.
pub(crate) enum Internal<O: Operation> {
    Connected {
        generation: u64,
        result: Result<RecordStream<O>>,
    },
    Submitted {
        id: SubmissionId,
        attempt: u32,
        result: Result<SubmitResponse<O>>,
    },
    Fetched {
        generation: u64,
        result: Result<Catchup<O>>,
    },
}

/// Next stream event, or never when there is no stream.
pub(crate) async fn next_event<O: Operation>(
    stream: &mut Option<RecordStream<O>>,
) -> Option<StreamEvent<O>> {
    match stream {
        Some(stream) => stream.recv().await,
        None => pending().await,
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

impl<O: Operation> RecordSession<O> {
    /// Open a new stream. Answers for older connections are ignored from now on.
    pub(super) fn connect(&mut self) {
        self.generation += 1;
        self.stream = None;
        self.synced = false;
        self.resyncing = false;
        self.held.clear();

        let generation = self.generation;
        let service = self.service.clone();
        let record = self.record.clone();
        let tx = self.internal_tx.clone();
        debug!(generation, "Connecting");
        tokio::spawn(
            async move {
                let result = service.subscribe(&record).await;
                let _ = tx.send(Internal::Connected { generation, result });
            }
            .in_current_span(),
        );
    }

    /// The link dropped: keep serving local state and schedule a reconnect.
    pub(super) fn connection_lost(&mut self, reason: &str) {
        if matches!(
            self.status,
            ConnectionStatus::Unauthorized | ConnectionStatus::Disconnected
        ) {
            return;
        }
        self.generation += 1;
        self.stream = None;
        self.synced = false;
        self.resyncing = false;
        self.held.clear();
        self.buffer.mark_uncertain();

        self.attempt += 1;
        if let Some(max) = self.config.max_reconnect_attempts
            && self.attempt > max
        {
            warn!(reason, attempts = max, "Giving up reconnecting");
            self.reconnect_at = None;
            self.set_status(ConnectionStatus::Disconnected);
            self.publish();
            return;
        }

        let delay = self.config.backoff_for(self.attempt);
        warn!(reason, attempt = self.attempt, ?delay, "Connection lost, reconnecting");
        self.reconnect_at = Some(Instant::now() + delay);
        self.set_status(ConnectionStatus::Reconnecting {
            attempt: self.attempt,
        });
        self.publish();
    }

    /// The service refused access. Nothing is retried.
    fn unauthorized(&mut self) {
        warn!("Access to record denied");
        self.generation += 1;
        self.stream = None;
        self.reconnect_at = None;
        self.resyncing = false;
        self.held.clear();
        self.set_status(ConnectionStatus::Unauthorized);
        self.publish();
    }

    /// Route a failed service call.
    fn service_failed(&mut self, context: &str, error: Error) {
        if error.is_unauthorized() {
            self.unauthorized();
        } else {
            if matches!(error, Error::Sync(SyncError::Diverged(_))) {
                self.force_snapshot = true;
            }
            self.connection_lost(&format!("{context}: {error}"));
        }
    }

    pub(super) fn handle_internal(&mut self, message: Internal<O>) {
        match message {
            Internal::Connected { generation, result } => {
                if generation != self.generation {
                    trace!(generation, "Ignoring outdated connection");
                    return;
                }
                match result {
                    Ok(stream) => self.stream = Some(stream),
                    Err(e) => self.service_failed("subscribe failed", e),
                }
            }

            Internal::Submitted {
                id,
                attempt,
                result,
            } => {
                if !self.buffer.is_current_attempt(id, attempt) {
                    trace!(submission = %id, attempt, "Ignoring outdated submit answer");
                    return;
                }
                match result {
                    Ok(SubmitResponse::Accepted { version }) => self.on_accepted(id, version),
                    Ok(SubmitResponse::Rejected { current, missing }) => {
                        if !self.buffer.mark_rejected(id, attempt) {
                            return;
                        }
                        if let Some(flight) = self.buffer.in_flight() {
                            let conflict = SyncError::VersionConflict {
                                base: flight.base,
                                current,
                            };
                            debug!(submission = %id, "{conflict}, rebasing");
                        }
                        for delta in missing {
                            if self.resyncing {
                                break;
                            }
                            self.on_delta(delta);
                        }
                        if !self.resyncing && self.buffer.version() < current {
                            self.start_resync();
                        }
                        self.publish();
                        self.flush();
                    }
                    Err(e) if e.is_invalid_operation() => {
                        warn!(submission = %id, "Service refused batch: {e}");
                        self.buffer.drop_in_flight();
                        self.publish();
                        self.flush();
                    }
                    Err(e) => self.service_failed("submit failed", e),
                }
            }

            Internal::Fetched { generation, result } => {
                if generation != self.generation {
                    return;
                }
                match result {
                    Ok(Catchup::Deltas(deltas)) => {
                        debug!(count = deltas.len(), "Catching up");
                        self.resyncing = false;
                        for delta in deltas {
                            if self.resyncing {
                                break;
                            }
                            self.on_delta(delta);
                        }
                        self.finish_resync();
                    }
                    Ok(Catchup::Snapshot(snapshot)) => {
                        debug!(
                            version = %snapshot.version,
                            "History unavailable, adopting snapshot"
                        );
                        self.resyncing = false;
                        self.adopt(snapshot);
                        self.finish_resync();
                    }
                    Err(e) => self.service_failed("fetch failed", e),
                }
            }
        }
    }

    fn on_accepted(&mut self, id: SubmissionId, version: RecordVersion) {
        match self.buffer.acknowledge(id, version) {
            Ok(true) => {
                debug!(submission = %id, %version, "Submission accepted");
                self.publish();
                self.flush();
            }
            Ok(false) => trace!(submission = %id, "Submission already confirmed"),
            // Other changes were accepted first; the stream delivers them
            // together with our own delta.
            Err(e) if e.needs_resync() => trace!(submission = %id, "{e}, waiting for stream"),
            Err(e) => {
                warn!("{e}, reloading record");
                self.force_snapshot = true;
                self.connection_lost("diverged from service");
            }
        }
    }

    /// First event of every stream.
    pub(super) fn on_snapshot(&mut self, snapshot: Snapshot<O::Value>) {
        self.synced = true;
        self.attempt = 0;

        let local: Vec<(ClientId, Option<Selection>)> = self
            .local_clients
            .iter()
            .map(|client| (client.clone(), self.presence.selection_of(client)))
            .collect();

        if self.buffer.is_pristine() || self.force_snapshot {
            self.adopt(snapshot);
        } else {
            self.presence.load(&snapshot.presence);
            if snapshot.version > self.buffer.version() {
                self.start_resync();
            } else if snapshot.version < self.buffer.version() {
                warn!(
                    snapshot = %snapshot.version,
                    confirmed = %self.buffer.version(),
                    "Service is behind the confirmed version"
                );
            }
        }

        // Our own presence was dropped along with the old connection.
        for (client, selection) in local {
            if selection.is_none() {
                continue;
            }
            let update = PresenceUpdate {
                seq: self.presence_seq(&client),
                client,
                selection,
            };
            self.presence.absorb(&update);
            self.send_presence(update);
        }

        info!(version = %self.buffer.version(), "Connected");
        self.set_status(ConnectionStatus::Connected);
        self.publish();
        self.flush();
    }

    /// Replace confirmed state wholesale.
    fn adopt(&mut self, snapshot: Snapshot<O::Value>) {
        let had_state = !self.buffer.is_pristine();
        match self.buffer.adopt_snapshot(snapshot.value, snapshot.version) {
            Ok(dropped) => {
                if dropped > 0 {
                    warn!(dropped, "Pending batches no longer apply to the snapshot");
                }
                if had_state {
                    self.history.clear();
                }
                self.force_snapshot = false;
            }
            Err(e) => warn!("Cannot adopt snapshot: {e}"),
        }
        self.presence.load(&snapshot.presence);
    }

    /// Fetch everything after the confirmed version. Stream events are held
    /// until the fetch is folded.
    pub(super) fn start_resync(&mut self) {
        if self.resyncing {
            return;
        }
        self.resyncing = true;
        let since = self.buffer.version();
        let generation = self.generation;
        let service = self.service.clone();
        let record = self.record.clone();
        let tx = self.internal_tx.clone();
        debug!(%since, "Resynchronizing");
        tokio::spawn(
            async move {
                let result = service.fetch(&record, since).await;
                let _ = tx.send(Internal::Fetched { generation, result });
            }
            .in_current_span(),
        );
    }

    fn finish_resync(&mut self) {
        let held = std::mem::take(&mut self.held);
        let mut events = held.into_iter();
        for event in events.by_ref() {
            self.handle_event(event);
            if self.resyncing {
                break;
            }
        }
        // A new gap showed up; keep the rest for after the next fetch.
        self.held.extend(events);
        self.publish();
        self.flush();
    }

    /// Send the next batch if the link is up and nothing is awaiting an answer.
    pub(super) fn flush(&mut self) {
        if !self.synced || self.resyncing || self.stream.is_none() {
            return;
        }
        let last_submission = &mut self.last_submission;
        let Some(submission) = self.buffer.next_submission(|| {
            *last_submission += 1;
            SubmissionId::new(*last_submission)
        }) else {
            return;
        };
        let id = submission.id;
        let attempt = self.buffer.in_flight().map_or(1, |flight| flight.attempt);
        debug!(
            submission = %id,
            base = %submission.base,
            ops = submission.ops.len(),
            attempt,
            "Submitting"
        );

        let service = self.service.clone();
        let record = self.record.clone();
        let tx = self.internal_tx.clone();
        let limit = self.config.submit_timeout();
        tokio::spawn(
            async move {
                let result = match timeout(limit, service.submit(&record, submission)).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout.into()),
                };
                let _ = tx.send(Internal::Submitted {
                    id,
                    attempt,
                    result,
                });
            }
            .in_current_span(),
        );
    }

    /// Publish a local selection when connected. Presence is best effort.
    pub(super) fn send_presence(&mut self, update: PresenceUpdate) {
        if !self.synced {
            return;
        }
        let service = self.service.clone();
        let record = self.record.clone();
        tokio::spawn(
            async move {
                if let Err(e) = service.publish_presence(&record, update).await {
                    debug!("Failed to publish presence: {e}");
                }
            }
            .in_current_span(),
        );
    }
}
