//! Subscription manager.
//!
//! A [`RecordEngine`] runs at most one record session per [`RecordId`],
//! shared by every subscription to that record. Subscriptions are reference
//! counted: the first one starts the session and the last one to close
//! shuts it down. Commands carry the acting [`ClientId`] explicitly, so any
//! number of local clients can edit the same record through one engine.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    Result,
    config::EngineConfig,
    operation::Operation,
    record::{ClientId, RecordId, Selection, SharedRecord},
    sync::{
        RecordService, SyncError,
        session::{RecordSession, SessionCommand},
    },
};

struct SessionEntry<O: Operation> {
    commands: mpsc::Sender<SessionCommand<O>>,
    task: JoinHandle<()>,
    listeners: HashSet<u64>,
}

struct EngineInner<O: Operation> {
    service: Arc<dyn RecordService<O>>,
    config: EngineConfig,
    /// Held across session teardown, so a new subscription never sees a
    /// session that is halfway through shutting down.
    sessions: Mutex<HashMap<RecordId, SessionEntry<O>>>,
    next_listener: AtomicU64,
}

/// Client-side synchronization engine for records edited with operations `O`.
pub struct RecordEngine<O: Operation> {
    inner: Arc<EngineInner<O>>,
}

impl<O: Operation> Clone for RecordEngine<O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<O: Operation> RecordEngine<O> {
    pub fn new(service: Arc<dyn RecordService<O>>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                service,
                config,
                sessions: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Subscribe to `record`.
    ///
    /// `on_update` is called with the current record right away and then with
    /// every new state, from the record's session task. It must not block.
    pub async fn subscribe<F>(
        &self,
        record: impl Into<RecordId>,
        on_update: F,
    ) -> Result<Subscription<O>>
    where
        F: Fn(SharedRecord<O::Value>) + Send + Sync + 'static,
    {
        let record = record.into();
        let listener_id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);

        let mut sessions = self.inner.sessions.lock().await;
        let entry = sessions.entry(record.clone()).or_insert_with(|| {
            info!(%record, "Opening record session");
            let (commands, task) = RecordSession::start(
                record.clone(),
                self.inner.service.clone(),
                self.inner.config.clone(),
            );
            SessionEntry {
                commands,
                task,
                listeners: HashSet::new(),
            }
        });

        let (tx, rx) = oneshot::channel();
        let attached = match entry
            .commands
            .send(SessionCommand::Attach {
                listener_id,
                listener: Arc::new(on_update),
                response: tx,
            })
            .await
        {
            Ok(()) => rx
                .await
                .map_err(|_| SyncError::SessionClosed(record.clone())),
            Err(e) => Err(SyncError::CommandSendError(e.to_string())),
        };
        if let Err(e) = attached {
            if entry.listeners.is_empty()
                && let Some(entry) = sessions.remove(&record)
            {
                warn!(%record, "Failed to attach to a new session: {e}");
                entry.task.abort();
            }
            return Err(e.into());
        }
        entry.listeners.insert(listener_id);
        debug!(
            %record,
            listener = listener_id,
            subscribers = entry.listeners.len(),
            "Subscribed"
        );

        Ok(Subscription {
            engine: self.inner.clone(),
            record,
            listener_id,
            closed: false,
        })
    }

    async fn request<T>(
        &self,
        record: &RecordId,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand<O>,
    ) -> Result<T> {
        let commands = {
            let sessions = self.inner.sessions.lock().await;
            sessions
                .get(record)
                .ok_or_else(|| SyncError::NotSubscribed(record.clone()))?
                .commands
                .clone()
        };
        let (tx, rx) = oneshot::channel();
        commands
            .send(build(tx))
            .await
            .map_err(|e| SyncError::CommandSendError(e.to_string()))?;
        rx.await
            .map_err(|_| SyncError::SessionClosed(record.clone()).into())
    }

    /// Apply `ops` on behalf of `client`.
    ///
    /// The edit is visible immediately and transmitted in the background.
    /// Fails with an invalid-operation error, leaving the record unchanged,
    /// when `ops` do not apply to the current value.
    pub async fn apply(&self, record: &RecordId, client: &ClientId, ops: Vec<O>) -> Result<()> {
        let client = client.clone();
        self.request(record, |response| SessionCommand::Apply {
            client,
            ops,
            response,
        })
        .await?
    }

    /// Revert `client`'s most recent change. A no-op when there is none.
    pub async fn undo(&self, record: &RecordId, client: &ClientId) -> Result<()> {
        let client = client.clone();
        self.request(record, |response| SessionCommand::Undo { client, response })
            .await?
    }

    /// Reapply `client`'s most recently undone change. A no-op when there is none.
    pub async fn redo(&self, record: &RecordId, client: &ClientId) -> Result<()> {
        let client = client.clone();
        self.request(record, |response| SessionCommand::Redo { client, response })
            .await?
    }

    /// Set or clear `client`'s selection and publish it to other clients.
    pub async fn set_selection(
        &self,
        record: &RecordId,
        client: &ClientId,
        selection: Option<Selection>,
    ) -> Result<()> {
        let client = client.clone();
        self.request(record, |response| SessionCommand::SetSelection {
            client,
            selection,
            response,
        })
        .await?
    }

    /// Current state of a subscribed record.
    pub async fn record(&self, record: &RecordId) -> Result<SharedRecord<O::Value>> {
        self.request(record, |response| SessionCommand::Snapshot { response })
            .await
    }

    /// Records with a running session.
    pub async fn active_records(&self) -> Vec<RecordId> {
        self.inner.sessions.lock().await.keys().cloned().collect()
    }

    /// Stop every record session, regardless of open subscriptions.
    pub async fn shutdown(&self) {
        let mut sessions = self.inner.sessions.lock().await;
        for (record, entry) in sessions.drain() {
            debug!(%record, "Stopping record session");
            stop_session(entry).await;
        }
    }
}

impl<O: Operation> EngineInner<O> {
    async fn detach(&self, record: &RecordId, listener_id: u64) {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get_mut(record) else {
            return;
        };
        if !entry.listeners.remove(&listener_id) {
            return;
        }

        let (tx, rx) = oneshot::channel();
        if entry
            .commands
            .send(SessionCommand::Detach {
                listener_id,
                response: tx,
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }

        if entry.listeners.is_empty()
            && let Some(entry) = sessions.remove(record)
        {
            info!(%record, "Closing record session");
            stop_session(entry).await;
        }
    }
}

async fn stop_session<O: Operation>(entry: SessionEntry<O>) {
    let (tx, rx) = oneshot::channel();
    if entry
        .commands
        .send(SessionCommand::Shutdown { response: tx })
        .await
        .is_ok()
    {
        let _ = rx.await;
    }
    if let Err(e) = entry.task.await {
        warn!("Record session task failed: {e}");
    }
}

/// Handle to one subscription.
///
/// Call [`close`](Self::close) to tear it down; once it returns, the
/// callback is never invoked again. Dropping the handle detaches the
/// callback in the background instead.
pub struct Subscription<O: Operation> {
    engine: Arc<EngineInner<O>>,
    record: RecordId,
    listener_id: u64,
    closed: bool,
}

impl<O: Operation> Subscription<O> {
    pub fn record_id(&self) -> &RecordId {
        &self.record
    }

    /// Detach the callback; the last subscription of a record also stops its
    /// session, cancelling reconnect timers and discarding unsent operations.
    pub async fn close(mut self) {
        self.closed = true;
        self.engine.detach(&self.record, self.listener_id).await;
    }
}

impl<O: Operation> std::fmt::Debug for Subscription<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("record", &self.record)
            .field("listener_id", &self.listener_id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<O: Operation> Drop for Subscription<O> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let engine = self.engine.clone();
        let record = self.record.clone();
        let listener_id = self.listener_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { engine.detach(&record, listener_id).await });
            }
            Err(_) => debug!(%record, "Subscription dropped outside a runtime; not detached"),
        }
    }
}
