//! Test context for managing a service and the clients talking to it.
//!
//! Each [`Peer`](crate::helpers::Peer) gets its own engine, standing in for a
//! separate process connected to the same authoritative service.

use std::sync::Arc;

use recsync::{
    EngineConfig, RecordEngine, RecordId, operation::text::TextOp, sync::MemoryService,
};

use crate::helpers::{POLL_INTERVAL, Peer, WAIT_TIMEOUT, fast_config};

pub struct TestContext {
    pub service: Arc<MemoryService<TextOp>>,
    pub record: RecordId,
    config: EngineConfig,
}

impl TestContext {
    /// A fresh service and one record, with fast reconnects.
    pub fn new() -> Self {
        Self {
            service: Arc::new(MemoryService::new()),
            record: RecordId::new("doc"),
            config: fast_config(),
        }
    }

    /// Use `config` for every peer created afterwards.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// A connected peer with its own engine.
    pub async fn peer(&self, name: &str) -> Peer {
        let engine = RecordEngine::new(self.service.clone(), self.config.clone());
        let peer = Peer::subscribe(engine, name, self.record.clone()).await;
        peer.wait_connected().await;
        peer
    }

    /// Wait until every peer holds the authoritative value and version.
    pub async fn settle(&self, peers: &[&Peer]) -> String {
        let converged = async {
            loop {
                let version = self.service.version(&self.record);
                let mut behind = false;
                for peer in peers {
                    if peer.state().await.version != version {
                        behind = true;
                    }
                }
                if !behind {
                    break;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(WAIT_TIMEOUT, converged)
            .await
            .expect("peers did not reach the service version");

        let expected = self
            .service
            .snapshot(&self.record)
            .map(|snapshot| snapshot.value)
            .unwrap_or_default();
        for peer in peers {
            peer.wait_for(|record| record.value == expected).await;
        }
        expected
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
