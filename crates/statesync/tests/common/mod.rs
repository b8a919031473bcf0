//! Common test utilities for state sync
//!
//! Provides mocks, snapshot fixtures and a simulated network of remote peers
//! that answer the reactor's requests.

pub mod mocks;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use mocks::{FixedStateProvider, MockApp, MockSwitch};
use statesync::{Envelope, Metrics, Reactor, Snapshot, StateSyncConfig, SyncError};
use statesync_primitives::{Commit, Height, PeerId, State};
use statesync_protocol::{ChunkResponse, Message, SnapshotsResponse};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic contents of chunk `index` of a snapshot
pub fn chunk_data(height: Height, format: u32, index: u32) -> Vec<u8> {
    format!("chunk-{height}-{format}-{index}").into_bytes()
}

pub fn create_test_snapshot(height: Height, format: u32, chunks: u32) -> Snapshot {
    Snapshot {
        height,
        format,
        chunks,
        hash: format!("snapshot-{height}-{format}").into_bytes(),
        metadata: vec![],
    }
}

/// A remote peer serving a fixed set of snapshots
#[derive(Clone)]
pub struct RemotePeer {
    pub id: PeerId,
    pub snapshots: Vec<Snapshot>,
    /// Chunk indices this peer never answers
    pub unresponsive: HashSet<u32>,
    /// Chunk indices this peer reports missing
    pub missing: HashSet<u32>,
}

impl RemotePeer {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        Self {
            id: PeerId::random(),
            snapshots,
            unresponsive: HashSet::new(),
            missing: HashSet::new(),
        }
    }

    pub fn unresponsive_for(mut self, index: u32) -> Self {
        let _ = self.unresponsive.insert(index);
        self
    }

    pub fn missing_for(mut self, index: u32) -> Self {
        let _ = self.missing.insert(index);
        self
    }

    fn serves(&self, height: Height, format: u32) -> bool {
        self.snapshots
            .iter()
            .any(|snapshot| snapshot.height == height && snapshot.format == format)
    }
}

/// Everything a test needs around one reactor
pub struct TestNode {
    pub reactor: Arc<Reactor>,
    pub app: MockApp,
    pub provider: FixedStateProvider,
    pub switch: MockSwitch,
    pub metrics: Metrics,
}

impl TestNode {
    /// Builds a node connected to `peers`. Outbound messages end up in the
    /// returned receiver.
    pub fn new(
        config: StateSyncConfig,
        peers: Vec<PeerId>,
    ) -> (Self, mpsc::UnboundedReceiver<(PeerId, Message)>) {
        init_tracing();

        let app = MockApp::new();
        let (switch, outbox) = MockSwitch::new(peers);
        let metrics = Metrics::default();

        let reactor = Arc::new(Reactor::new(
            config,
            Arc::new(app.clone()),
            Arc::new(app.clone()),
            Arc::new(switch.clone()),
            metrics.clone(),
        ));

        let node = Self {
            reactor,
            app,
            provider: FixedStateProvider::new(),
            switch,
            metrics,
        };

        (node, outbox)
    }

    /// Builds a node connected to `peers` and spawns the network task that
    /// answers on their behalf.
    pub fn spawn(config: StateSyncConfig, peers: Vec<RemotePeer>) -> (Self, JoinHandle<()>) {
        let (node, outbox) = Self::new(config, peers.iter().map(|peer| peer.id).collect());
        let network = tokio::spawn(run_network(Arc::clone(&node.reactor), outbox, peers));

        (node, network)
    }

    pub async fn sync(
        &self,
        max_discovery_time: Duration,
    ) -> Result<(State, Commit), SyncError> {
        self.reactor
            .sync(Arc::new(self.provider.clone()), max_discovery_time)
            .await
    }
}

/// Answers the reactor's outbound requests as the remote peers would.
async fn run_network(
    reactor: Arc<Reactor>,
    mut outbox: mpsc::UnboundedReceiver<(PeerId, Message)>,
    peers: Vec<RemotePeer>,
) {
    let peers: HashMap<PeerId, RemotePeer> =
        peers.into_iter().map(|peer| (peer.id, peer)).collect();

    while let Some((to, message)) = outbox.recv().await {
        let Some(peer) = peers.get(&to) else {
            continue;
        };

        match message {
            Message::SnapshotsRequest => {
                for snapshot in &peer.snapshots {
                    let msg = Message::SnapshotsResponse(SnapshotsResponse::from(snapshot));
                    reactor.receive(Envelope::new(peer.id, msg)).await;
                }
            }
            Message::ChunkRequest(request) => {
                if peer.unresponsive.contains(&request.index) {
                    continue;
                }

                let response = if peer.serves(request.height, request.format)
                    && !peer.missing.contains(&request.index)
                {
                    ChunkResponse {
                        height: request.height,
                        format: request.format,
                        index: request.index,
                        chunk: chunk_data(request.height, request.format, request.index),
                        missing: false,
                    }
                } else {
                    ChunkResponse {
                        height: request.height,
                        format: request.format,
                        index: request.index,
                        chunk: vec![],
                        missing: true,
                    }
                };

                reactor
                    .receive(Envelope::new(peer.id, Message::ChunkResponse(response)))
                    .await;
            }
            Message::SnapshotsResponse(_) | Message::ChunkResponse(_) => {}
        }
    }
}
