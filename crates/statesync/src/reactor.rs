//! Peer-facing side of state sync.
//!
//! The reactor always serves local snapshots to peers. While a sync session
//! is running it also owns that session's [`Syncer`] and forwards peer
//! events and inbound snapshots and chunks to it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use statesync_primitives::{Commit, PeerId, State};
use statesync_protocol::{
    channel_descriptors, ChannelDescriptor, ChannelId, ChunkRequest, ChunkResponse, Message,
    SnapshotsResponse,
};
use tracing::{debug, error, info, warn};

use crate::app::{AppConnQuery, AppConnSnapshot};
use crate::config::StateSyncConfig;
use crate::error::SyncError;
use crate::metrics::Metrics;
use crate::provider::StateProvider;
use crate::snapshots::Snapshot;
use crate::switch::{Envelope, Switch};
use crate::syncer::Syncer;

/// Number of local snapshots advertised in response to a request.
pub const RECENT_SNAPSHOTS: usize = 10;

pub struct Reactor {
    config: StateSyncConfig,
    conn: Arc<dyn AppConnSnapshot>,
    conn_query: Arc<dyn AppConnQuery>,
    switch: Arc<dyn Switch>,
    metrics: Metrics,
    syncer: RwLock<Option<Arc<Syncer>>>,
}

impl Reactor {
    pub fn new(
        config: StateSyncConfig,
        conn: Arc<dyn AppConnSnapshot>,
        conn_query: Arc<dyn AppConnQuery>,
        switch: Arc<dyn Switch>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            conn,
            conn_query,
            switch,
            metrics,
            syncer: RwLock::new(None),
        }
    }

    /// Channels the transport must open for this reactor.
    #[must_use]
    pub const fn channels() -> [ChannelDescriptor; 2] {
        channel_descriptors()
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncer.read().is_some()
    }

    pub fn add_peer(&self, peer: PeerId) {
        let _ = self.with_syncer(|syncer| syncer.add_peer(peer));
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        let _ = self.with_syncer(|syncer| syncer.remove_peer(peer));
    }

    /// Decodes raw bytes received on `channel` and handles the message.
    /// Malformed input disconnects the sender.
    pub async fn receive_raw(&self, src: PeerId, channel: u8, bytes: &[u8]) {
        let decoded = ChannelId::try_from(channel)
            .and_then(|channel| Message::decode(channel, bytes).map(|message| (channel, message)));

        match decoded {
            Ok((channel, message)) => {
                self.receive(Envelope {
                    src,
                    channel,
                    message,
                })
                .await;
            }
            Err(err) => {
                error!(peer = %src, channel, %err, "Failed to decode message");
                self.switch.stop_peer_for_error(&src, &err.to_string());
            }
        }
    }

    /// Handles one inbound message. Messages that fail validation
    /// disconnect the sender.
    pub async fn receive(&self, envelope: Envelope) {
        let Envelope {
            src,
            channel,
            message,
        } = envelope;

        if let Err(err) = message.validate(channel) {
            error!(peer = %src, message = message.name(), %err, "Invalid message");
            self.switch.stop_peer_for_error(&src, &err.to_string());
            return;
        }

        match message {
            Message::SnapshotsRequest => self.serve_snapshots(src).await,
            Message::SnapshotsResponse(msg) => self.handle_snapshot(src, msg),
            Message::ChunkRequest(msg) => self.serve_chunk(src, msg).await,
            Message::ChunkResponse(msg) => self.handle_chunk(src, msg),
        }
    }

    /// Runs a sync session to completion, returning the trusted state and
    /// commit at the height of the restored snapshot.
    ///
    /// Only one session may run at a time.
    pub async fn sync(
        &self,
        state_provider: Arc<dyn StateProvider>,
        max_discovery_time: Duration,
    ) -> Result<(State, Commit), SyncError> {
        let syncer = {
            let mut slot = self.syncer.write();
            if slot.is_some() {
                return Err(SyncError::AlreadyInProgress);
            }

            let syncer = Arc::new(Syncer::new(
                self.config,
                Arc::clone(&self.conn),
                Arc::clone(&self.conn_query),
                state_provider,
                Arc::clone(&self.switch),
                self.metrics.clone(),
            ));
            *slot = Some(Arc::clone(&syncer));
            syncer
        };

        let _session = Session {
            slot: &self.syncer,
            metrics: &self.metrics,
        };
        self.metrics.syncing.set(1);

        let switch = Arc::clone(&self.switch);
        let request_snapshots = move || {
            debug!("Requesting snapshots from all peers");
            switch.broadcast(Message::SnapshotsRequest);
        };

        info!(?max_discovery_time, "Starting state sync");
        request_snapshots();

        let result = syncer.sync_any(max_discovery_time, &request_snapshots).await;

        match &result {
            Ok((state, _)) => info!(height = state.last_block_height, "State sync complete"),
            Err(err) => warn!(%err, "State sync failed"),
        }

        result
    }

    fn with_syncer<R>(&self, f: impl FnOnce(&Syncer) -> R) -> Option<R> {
        self.syncer.read().as_deref().map(f)
    }

    async fn serve_snapshots(&self, peer: PeerId) {
        let snapshots = match self.recent_snapshots(RECENT_SNAPSHOTS).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                error!(%peer, ?err, "Failed to list snapshots");
                return;
            }
        };

        for snapshot in &snapshots {
            debug!(
                height = snapshot.height,
                format = snapshot.format,
                %peer,
                "Advertising snapshot"
            );
            let msg = Message::SnapshotsResponse(SnapshotsResponse::from(snapshot));
            if !self.switch.send(&peer, msg) {
                debug!(%peer, "Failed to queue snapshot advertisement");
            }
        }
    }

    /// The `n` most recent local snapshots, highest height and format first.
    async fn recent_snapshots(&self, n: usize) -> eyre::Result<Vec<Snapshot>> {
        let mut snapshots = self.conn.list_snapshots().await?;
        snapshots.sort_unstable_by(|a, b| b.key().cmp(&a.key()));
        snapshots.truncate(n);
        Ok(snapshots)
    }

    async fn serve_chunk(&self, peer: PeerId, msg: ChunkRequest) {
        debug!(height = msg.height, format = msg.format, index = msg.index, %peer, "Serving chunk");

        let chunk = match self
            .conn
            .load_snapshot_chunk(msg.height, msg.format, msg.index)
            .await
        {
            Ok(chunk) => chunk,
            Err(err) => {
                error!(height = msg.height, format = msg.format, index = msg.index, %peer, ?err, "Failed to load chunk");
                return;
            }
        };

        let response = ChunkResponse {
            height: msg.height,
            format: msg.format,
            index: msg.index,
            missing: chunk.is_none(),
            chunk: chunk.map(Vec::from).unwrap_or_default(),
        };

        if !self.switch.send(&peer, Message::ChunkResponse(response)) {
            debug!(%peer, index = msg.index, "Failed to queue chunk response");
        }
    }

    fn handle_snapshot(&self, peer: PeerId, msg: SnapshotsResponse) {
        let snapshot = Snapshot::from(msg);
        let handled = self.with_syncer(|syncer| syncer.add_snapshot(peer, snapshot));
        if handled.is_none() {
            debug!(%peer, "Ignoring snapshot advertisement, no state sync in progress");
        }
    }

    fn handle_chunk(&self, peer: PeerId, msg: ChunkResponse) {
        let (height, format, index) = (msg.height, msg.format, msg.index);

        match self.with_syncer(|syncer| syncer.add_chunk(peer, msg)) {
            None => debug!(%peer, height, format, index, "Ignoring chunk, no state sync in progress"),
            Some(Ok(_)) => {}
            Some(Err(err)) => debug!(%peer, height, format, index, %err, "Dropping chunk"),
        }
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("config", &self.config)
            .field("syncing", &self.is_syncing())
            .finish_non_exhaustive()
    }
}

/// Clears the session slot when the session ends, however it ends.
struct Session<'a> {
    slot: &'a RwLock<Option<Arc<Syncer>>>,
    metrics: &'a Metrics,
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        *self.slot.write() = None;
        self.metrics.syncing.set(0);
    }
}
