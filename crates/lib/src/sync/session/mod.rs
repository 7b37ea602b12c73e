//! Record session: the single update queue of one record.
//!
//! Every state change of a record (commands from the engine, stream events,
//! answers from the service) is folded by one task, in arrival order. The
//! session owns the operation buffer, the undo history and the cursor
//! registry, and pushes a fresh immutable [`Record`] to its listeners
//! whenever the visible state changes. Talking to the service happens in
//! spawned tasks that report back through an internal channel, so a slow
//! submit never blocks local edits.

use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{Instrument, debug, info, info_span, trace, warn};

use super::{
    buffer::{OperationBuffer, RemoteOutcome},
    error::SyncError,
    history::UndoHistory,
    presence::CursorRegistry,
    protocol::{Delta, PresenceUpdate, StreamEvent},
    service::{RecordService, RecordStream},
};
use crate::{
    Result,
    config::{EngineConfig, UndoMode},
    operation::Operation,
    record::{ClientId, ConnectionStatus, Record, RecordId, Selection, SharedRecord},
};

mod link;

use link::{Internal, next_event, wait_until};

/// Callback invoked with every new record state.
pub type RecordListener<V> = Arc<dyn Fn(SharedRecord<V>) + Send + Sync>;

/// Commands that can be sent to a record session
pub(crate) enum SessionCommand<O: Operation> {
    /// Register a listener; it is called right away with the current record.
    Attach {
        listener_id: u64,
        listener: RecordListener<O::Value>,
        response: oneshot::Sender<()>,
    },
    /// Remove a listener. Once answered, it is never called again.
    Detach {
        listener_id: u64,
        response: oneshot::Sender<()>,
    },
    Apply {
        client: ClientId,
        ops: Vec<O>,
        response: oneshot::Sender<Result<()>>,
    },
    Undo {
        client: ClientId,
        response: oneshot::Sender<Result<()>>,
    },
    Redo {
        client: ClientId,
        response: oneshot::Sender<Result<()>>,
    },
    SetSelection {
        client: ClientId,
        selection: Option<Selection>,
        response: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        response: oneshot::Sender<SharedRecord<O::Value>>,
    },
    /// Cancel timers, drop unsent operations and stop.
    Shutdown { response: oneshot::Sender<()> },
}

pub(crate) struct RecordSession<O: Operation> {
    record: RecordId,
    service: Arc<dyn RecordService<O>>,
    config: EngineConfig,

    buffer: OperationBuffer<O>,
    history: UndoHistory<O>,
    presence: CursorRegistry,
    local_clients: BTreeSet<ClientId>,
    status: ConnectionStatus,

    listeners: Vec<(u64, RecordListener<O::Value>)>,
    published: Option<SharedRecord<O::Value>>,

    // Connection state
    stream: Option<RecordStream<O>>,
    /// Bumped on every (re)connect; answers from older connections are ignored.
    generation: u64,
    synced: bool,
    resyncing: bool,
    force_snapshot: bool,
    held: Vec<StreamEvent<O>>,
    reconnect_at: Option<Instant>,
    attempt: u32,
    last_submission: u64,

    // Communication
    commands: mpsc::Receiver<SessionCommand<O>>,
    internal_tx: mpsc::UnboundedSender<Internal<O>>,
    internal_rx: mpsc::UnboundedReceiver<Internal<O>>,
}

impl<O: Operation> RecordSession<O> {
    /// Spawn the session for `record` and return its command sender.
    pub(crate) fn start(
        record: RecordId,
        service: Arc<dyn RecordService<O>>,
        config: EngineConfig,
    ) -> (mpsc::Sender<SessionCommand<O>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let session = Self {
            record,
            service,
            history: UndoHistory::new(config.max_undo_depth),
            config,
            buffer: OperationBuffer::new(),
            presence: CursorRegistry::new(),
            local_clients: BTreeSet::new(),
            status: ConnectionStatus::Connecting,
            listeners: Vec::new(),
            published: None,
            stream: None,
            generation: 0,
            synced: false,
            resyncing: false,
            force_snapshot: false,
            held: Vec::new(),
            reconnect_at: None,
            attempt: 0,
            // Ids must not repeat across sessions of the same client.
            last_submission: uuid::Uuid::new_v4().as_u64_pair().0 >> 16,
            commands: rx,
            internal_tx,
            internal_rx,
        };

        let task = tokio::spawn(session.run());
        (tx, task)
    }

    /// Main event loop of the session
    async fn run(mut self) {
        let span = info_span!("record_session", record = %self.record);
        async move {
            info!("Starting record session");
            self.connect();

            loop {
                tokio::select! {
                    command = self.commands.recv() => match command {
                        Some(SessionCommand::Shutdown { response }) => {
                            self.teardown();
                            let _ = response.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        // Engine dropped without closing.
                        None => {
                            self.teardown();
                            break;
                        }
                    },

                    Some(message) = self.internal_rx.recv() => {
                        self.handle_internal(message);
                    }

                    event = next_event(&mut self.stream) => match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            self.stream = None;
                            self.connection_lost("stream closed");
                        }
                    },

                    _ = wait_until(self.reconnect_at) => {
                        self.reconnect_at = None;
                        self.connect();
                    }
                }
            }

            info!("Record session stopped");
        }
        .instrument(span)
        .await
    }

    fn handle_command(&mut self, command: SessionCommand<O>) {
        match command {
            SessionCommand::Attach {
                listener_id,
                listener,
                response,
            } => {
                let current = self.current();
                listener(current);
                self.listeners.push((listener_id, listener));
                debug!(listener = listener_id, count = self.listeners.len(), "Listener attached");
                let _ = response.send(());
            }

            SessionCommand::Detach {
                listener_id,
                response,
            } => {
                self.listeners.retain(|(id, _)| *id != listener_id);
                debug!(listener = listener_id, count = self.listeners.len(), "Listener detached");
                let _ = response.send(());
            }

            SessionCommand::Apply {
                client,
                ops,
                response,
            } => {
                let result = self.apply(client, ops);
                let _ = response.send(result);
            }

            SessionCommand::Undo { client, response } => self.revert(client, false, response),

            SessionCommand::Redo { client, response } => self.revert(client, true, response),

            SessionCommand::SetSelection {
                client,
                selection,
                response,
            } => {
                let result = self.set_selection(client, selection);
                let _ = response.send(result);
            }

            SessionCommand::Snapshot { response } => {
                let _ = response.send(self.current());
            }

            SessionCommand::Shutdown { response } => {
                // Handled by the run loop.
                let _ = response.send(());
            }
        }
    }

    fn ensure_authorized(&self) -> Result<()> {
        if self.status == ConnectionStatus::Unauthorized {
            return Err(SyncError::Unauthorized(self.record.clone()).into());
        }
        Ok(())
    }

    /// Optimistically apply a fresh local edit.
    fn apply(&mut self, client: ClientId, ops: Vec<O>) -> Result<()> {
        self.ensure_authorized()?;
        if ops.is_empty() {
            return Ok(());
        }
        let inverse = self.buffer.apply_local(&client, ops.clone())?;
        trace!(%client, ops = ops.len(), "Applied local operations");

        if self.config.undo_mode == UndoMode::ClientSide {
            self.history.record(&client, inverse);
        }
        self.history.observe(&client, &ops);
        self.presence.transform(&ops);
        self.local_clients.insert(client);

        self.publish();
        self.flush();
        Ok(())
    }

    /// Undo (or redo) the most recent group of `client`.
    fn revert(&mut self, client: ClientId, redo: bool, response: oneshot::Sender<Result<()>>) {
        if let Err(e) = self.ensure_authorized() {
            let _ = response.send(Err(e));
            return;
        }

        if self.config.undo_mode == UndoMode::Server {
            let service = self.service.clone();
            let record = self.record.clone();
            tokio::spawn(
                async move {
                    let result = if redo {
                        service.submit_redo(&record, &client).await
                    } else {
                        service.submit_undo(&record, &client).await
                    };
                    if let Ok(Some(version)) = &result {
                        debug!(%client, %version, redo, "Service reverted change");
                    }
                    let _ = response.send(result.map(|_| ()));
                }
                .in_current_span(),
            );
            return;
        }

        let group = if redo {
            self.history.take_redo(&client)
        } else {
            self.history.take_undo(&client)
        };
        let Some(group) = group else {
            trace!(%client, redo, "Nothing to revert");
            let _ = response.send(Ok(()));
            return;
        };

        let result = match self.buffer.apply_local(&client, group.clone()) {
            Ok(inverse) => {
                if redo {
                    self.history.push_undo(&client, inverse);
                } else {
                    self.history.push_redo(&client, inverse);
                }
                self.history.observe(&client, &group);
                self.presence.transform(&group);
                self.local_clients.insert(client);
                self.publish();
                self.flush();
                Ok(())
            }
            Err(e) => {
                warn!(%client, redo, "Dropping history entry that no longer applies: {e}");
                Err(e.into())
            }
        };
        let _ = response.send(result);
    }

    /// Presence sequence numbers follow the wall clock, so a client that
    /// rejoins in a new session outranks the tombstone of its old one.
    fn presence_seq(&self, client: &ClientId) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_micros() as u64);
        self.presence.next_seq(client, now)
    }

    fn set_selection(&mut self, client: ClientId, selection: Option<Selection>) -> Result<()> {
        self.ensure_authorized()?;
        let update = PresenceUpdate {
            seq: self.presence_seq(&client),
            client: client.clone(),
            selection,
        };
        self.presence.absorb(&update);
        self.local_clients.insert(client);
        self.publish();
        self.send_presence(update);
        Ok(())
    }

    /// Fold one event from the live stream.
    fn handle_event(&mut self, event: StreamEvent<O>) {
        if self.resyncing && !matches!(event, StreamEvent::Snapshot(_)) {
            self.held.push(event);
            return;
        }
        match event {
            StreamEvent::Snapshot(snapshot) => self.on_snapshot(snapshot),
            StreamEvent::Delta(delta) => {
                self.on_delta(delta);
                self.publish();
            }
            StreamEvent::Presence(update) => {
                if self.local_clients.contains(&update.client) {
                    return;
                }
                if self.presence.absorb(&update) {
                    self.publish();
                }
            }
            StreamEvent::Departed(client) => {
                if !self.local_clients.contains(&client) && self.presence.depart(&client) {
                    debug!(%client, "Client departed");
                    self.publish();
                }
            }
        }
    }

    /// Fold one authoritative delta into the buffer and everything that
    /// tracks positions in the value.
    fn on_delta(&mut self, delta: Delta<O>) {
        let version = delta.version;
        match self.buffer.apply_remote(delta) {
            Ok(RemoteOutcome::Applied { client, visible }) => {
                trace!(%version, %client, "Applied remote change");
                self.history.observe(&client, &visible);
                self.presence.transform(&visible);
            }
            Ok(RemoteOutcome::Acknowledged { id, .. }) => {
                debug!(submission = %id, %version, "Submission confirmed");
                self.flush();
            }
            Ok(RemoteOutcome::Ignored) => {
                trace!(%version, "Ignoring already confirmed change");
            }
            Err(e) if e.needs_resync() => {
                debug!("{e}, resynchronizing");
                self.start_resync();
            }
            Err(e) => {
                warn!("{e}, reloading record");
                self.force_snapshot = true;
                self.connection_lost("diverged from service");
            }
        }
    }

    /// Drop local work that was never sent and leave the record.
    fn teardown(&mut self) {
        self.reconnect_at = None;
        self.stream = None;
        self.listeners.clear();
        let dropped = self.buffer.discard_unsent();
        if dropped > 0 {
            debug!(dropped, "Discarded unsent operations");
        }
        if self.status != ConnectionStatus::Unauthorized {
            for client in std::mem::take(&mut self.local_clients) {
                let service = self.service.clone();
                let record = self.record.clone();
                tokio::spawn(
                    async move {
                        if let Err(e) = service.leave(&record, &client).await {
                            debug!(%client, "Failed to leave record: {e}");
                        }
                    }
                    .in_current_span(),
                );
            }
        }
    }

    /// The current record state.
    fn current(&self) -> SharedRecord<O::Value> {
        Arc::new(Record {
            value: self.buffer.visible().clone(),
            version: self.buffer.version(),
            cursors: self.presence.cursors(),
            status: self.status.clone(),
        })
    }

    /// Notify listeners if the visible state changed.
    fn publish(&mut self) {
        let record = self.current();
        if self.published.as_deref() == Some(record.as_ref()) {
            return;
        }
        self.published = Some(record.clone());
        for (_, listener) in &self.listeners {
            listener(record.clone());
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!(?status, "Connection status changed");
            self.status = status;
        }
    }
}
