//! Helper functions for engine testing
//!
//! A [`Peer`] is one client editing the shared test record through its own
//! engine. It records every state pushed to its subscription callback so
//! tests can assert on notifications as well as on the current record.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use recsync::{
    ClientId, ConnectionStatus, EngineConfig, Record, RecordEngine, RecordId, Result, Selection,
    SharedRecord, Subscription, operation::text::TextOp,
};

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Short backoff and timeouts so recovery paths run quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_backoff(Duration::from_millis(20), Duration::from_millis(200))
        .with_submit_timeout(Duration::from_secs(5))
}

pub struct Peer {
    pub engine: RecordEngine<TextOp>,
    pub client: ClientId,
    pub record: RecordId,
    pub updates: Arc<Mutex<Vec<SharedRecord<String>>>>,
    subscription: Option<Subscription<TextOp>>,
}

impl Peer {
    pub async fn subscribe(engine: RecordEngine<TextOp>, name: &str, record: RecordId) -> Self {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        let subscription = engine
            .subscribe(record.clone(), move |state| sink.lock().unwrap().push(state))
            .await
            .expect("Failed to subscribe");
        Self {
            engine,
            client: ClientId::new(name),
            record,
            updates,
            subscription: Some(subscription),
        }
    }

    pub async fn apply(&self, ops: Vec<TextOp>) -> Result<()> {
        self.engine.apply(&self.record, &self.client, ops).await
    }

    pub async fn insert(&self, pos: usize, text: &str) {
        self.apply(vec![TextOp::insert(pos, text)])
            .await
            .expect("Failed to insert");
    }

    /// Append at the end of this peer's visible value.
    pub async fn append(&self, text: &str) {
        let len = self.value().await.chars().count();
        self.insert(len, text).await;
    }

    /// Apply and wait until the service confirmed exactly this change.
    pub async fn commit(&self, ops: Vec<TextOp>) {
        let target = self.state().await.version.get() + 1;
        self.apply(ops).await.expect("Failed to apply");
        self.wait_for(|record| record.version.get() >= target).await;
    }

    pub async fn undo(&self) -> Result<()> {
        self.engine.undo(&self.record, &self.client).await
    }

    pub async fn redo(&self) -> Result<()> {
        self.engine.redo(&self.record, &self.client).await
    }

    pub async fn select(&self, selection: Option<Selection>) {
        self.engine
            .set_selection(&self.record, &self.client, selection)
            .await
            .expect("Failed to set selection");
    }

    pub async fn state(&self) -> SharedRecord<String> {
        self.engine
            .record(&self.record)
            .await
            .expect("Record is not subscribed")
    }

    pub async fn value(&self) -> String {
        self.state().await.value.clone()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    /// Poll the record until `predicate` holds.
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&Record<String>) -> bool,
    ) -> SharedRecord<String> {
        let poll = async {
            loop {
                let state = self.state().await;
                if predicate(&state) {
                    return state;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(WAIT_TIMEOUT, poll).await {
            Ok(state) => state,
            Err(_) => panic!(
                "{} timed out waiting; last state: {:?}",
                self.client,
                self.state().await
            ),
        }
    }

    pub async fn wait_connected(&self) -> SharedRecord<String> {
        self.wait_for(|record| record.status == ConnectionStatus::Connected)
            .await
    }

    pub async fn wait_status(&self, status: ConnectionStatus) -> SharedRecord<String> {
        self.wait_for(move |record| record.status == status).await
    }

    /// Close the subscription and wait for the session to stop.
    pub async fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.close().await;
        }
    }
}
