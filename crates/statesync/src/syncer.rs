//! Snapshot discovery, restore and verification for one sync session.
//!
//! A session walks the snapshot pool best candidate first. For each
//! candidate it offers the snapshot to the application, fetches chunks from
//! the advertising peers on a background task and applies them strictly in
//! order. Once the last chunk is in, the application's reported state is
//! checked against the trusted state before the session succeeds.
//!
//! Locking: `snapshots` and `restore` are never held at the same time, and
//! never across an await point. Requests go out through the switch only
//! after the locks are released.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use statesync_primitives::{Commit, Hash, PeerId, State};
use statesync_protocol::{ChunkRequest, ChunkResponse, Message};
use tokio::sync::Notify;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::{AppConnQuery, AppConnSnapshot, ApplyChunkResult, OfferSnapshotResult};
use crate::chunks::ChunkQueue;
use crate::config::StateSyncConfig;
use crate::error::{RejectReason, SyncError};
use crate::metrics::Metrics;
use crate::provider::StateProvider;
use crate::snapshots::{Snapshot, SnapshotKey, SnapshotPool};
use crate::switch::Switch;

enum Restored {
    Complete,
    RetrySnapshot,
}

pub(crate) struct Syncer {
    config: StateSyncConfig,
    conn: Arc<dyn AppConnSnapshot>,
    conn_query: Arc<dyn AppConnQuery>,
    state_provider: Arc<dyn StateProvider>,
    switch: Arc<dyn Switch>,
    metrics: Metrics,

    snapshots: Mutex<SnapshotPool>,
    restore: Mutex<Option<ChunkQueue>>,

    /// Signalled when a chunk arrives.
    chunk_ready: Notify,
    /// Signalled when a request slot may have freed up.
    fetch_wake: Notify,
}

impl Syncer {
    pub(crate) fn new(
        config: StateSyncConfig,
        conn: Arc<dyn AppConnSnapshot>,
        conn_query: Arc<dyn AppConnQuery>,
        state_provider: Arc<dyn StateProvider>,
        switch: Arc<dyn Switch>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            conn,
            conn_query,
            state_provider,
            switch,
            metrics,
            snapshots: Mutex::new(SnapshotPool::new()),
            restore: Mutex::new(None),
            chunk_ready: Notify::new(),
            fetch_wake: Notify::new(),
        }
    }

    /// Asks a newly connected peer for its snapshots.
    pub(crate) fn add_peer(&self, peer: PeerId) {
        debug!(%peer, "Requesting snapshots from peer");
        if !self.switch.send(&peer, Message::SnapshotsRequest) {
            debug!(%peer, "Failed to queue snapshots request");
        }
    }

    pub(crate) fn remove_peer(&self, peer: &PeerId) {
        self.snapshots.lock().remove_peer(peer);

        let released = self
            .restore
            .lock()
            .as_mut()
            .map_or(0, |queue| queue.release_peer(peer));
        if released > 0 {
            debug!(%peer, released, "Returned chunk requests of disconnected peer");
        }

        self.fetch_wake.notify_one();
        self.chunk_ready.notify_one();
    }

    /// Returns whether the snapshot was new to the pool.
    pub(crate) fn add_snapshot(&self, peer: PeerId, snapshot: Snapshot) -> bool {
        let (height, format) = (snapshot.height, snapshot.format);
        let hash = hex::encode_upper(&snapshot.hash);

        let added = self.snapshots.lock().add(peer, snapshot);
        if added {
            self.metrics.snapshots_discovered.inc();
            info!(height, format, %hash, %peer, "Discovered new snapshot");
        }

        added
    }

    /// Hands a chunk response to the restore in progress. Returns whether
    /// the response was used.
    pub(crate) fn add_chunk(&self, peer: PeerId, msg: ChunkResponse) -> Result<bool, SyncError> {
        if self.snapshots.lock().is_peer_rejected(&peer) {
            debug!(index = msg.index, %peer, "Ignoring chunk from rejected peer");
            return Ok(false);
        }

        let accepted = {
            let mut restore = self.restore.lock();
            let queue = restore.as_mut().ok_or(SyncError::NoRestoreInProgress)?;

            if queue.snapshot() != SnapshotKey::new(msg.height, msg.format) {
                return Err(SyncError::UnexpectedChunk {
                    height: msg.height,
                    format: msg.format,
                });
            }

            let data = (!msg.missing).then(|| msg.chunk.into());
            queue.on_response(msg.index, peer, data)
        };

        if accepted {
            debug!(
                height = msg.height,
                format = msg.format,
                index = msg.index,
                missing = msg.missing,
                %peer,
                "Received chunk"
            );
            self.chunk_ready.notify_one();
            self.fetch_wake.notify_one();
        } else {
            debug!(index = msg.index, %peer, "Ignoring unexpected or duplicate chunk");
        }

        Ok(accepted)
    }

    /// Restores the best available snapshot, falling back to the next best
    /// whenever a candidate fails.
    ///
    /// Waits one discovery window before the first attempt. While the pool
    /// has nothing usable, `retry_hook` is called and another window waited,
    /// until `max_discovery_time` has passed (zero waits forever). A zero
    /// discovery window fails immediately instead.
    pub(crate) async fn sync_any(
        self: &Arc<Self>,
        max_discovery_time: Duration,
        retry_hook: &(dyn Fn() + Send + Sync),
    ) -> Result<(State, Commit), SyncError> {
        let discovery_time = self.config.discovery_time;
        let started = Instant::now();

        if !discovery_time.is_zero() {
            info!(?discovery_time, "Discovering snapshots");
            sleep(discovery_time).await;
        }

        loop {
            let candidate = self.snapshots.lock().best();

            let Some(snapshot) = candidate else {
                if discovery_time.is_zero() {
                    return Err(SyncError::NoSnapshotFound);
                }
                if !max_discovery_time.is_zero() && started.elapsed() >= max_discovery_time {
                    warn!(?max_discovery_time, "No usable snapshot found in time");
                    return Err(SyncError::NoSnapshotFound);
                }

                retry_hook();
                info!(?discovery_time, "No usable snapshots yet, discovering for another window");
                sleep(discovery_time).await;
                continue;
            };

            let key = snapshot.key();

            match self.sync(&snapshot).await {
                Ok(synced) => return Ok(synced),
                Err(err) if err.is_candidate_failure() => {
                    self.metrics.snapshots_rejected.inc();
                    warn!(height = key.height, format = key.format, %err, "Snapshot candidate failed");

                    let mut pool = self.snapshots.lock();
                    match err {
                        SyncError::CandidateRejected {
                            reason: RejectReason::Format,
                            ..
                        } => pool.reject_format(key.format),
                        SyncError::CandidateRejected {
                            reason: RejectReason::Sender,
                            ..
                        } => {
                            for peer in pool.peers_for(&key) {
                                info!(%peer, "Rejecting snapshot sender");
                                pool.reject_peer(&peer);
                            }
                        }
                        _ => pool.reject(&key),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Attempts to restore `snapshot`.
    async fn sync(self: &Arc<Self>, snapshot: &Snapshot) -> Result<(State, Commit), SyncError> {
        let app_hash = self
            .state_provider
            .app_hash(snapshot.height)
            .await
            .map_err(|err| rejected(snapshot, RejectReason::Provider(err.to_string())))?;

        let result = self.restore(snapshot, app_hash).await;

        *self.restore.lock() = None;

        result
    }

    async fn restore(
        self: &Arc<Self>,
        snapshot: &Snapshot,
        app_hash: Hash,
    ) -> Result<(State, Commit), SyncError> {
        self.offer_snapshot(snapshot, app_hash).await?;

        *self.restore.lock() = Some(ChunkQueue::new(
            snapshot,
            self.config.chunk_request_timeout,
        ));

        let cancel = CancellationToken::new();
        let _stop_fetching = cancel.clone().drop_guard();
        let _fetcher = tokio::spawn(Arc::clone(self).fetch_chunks(snapshot.key(), cancel));

        // Fetch the trusted state up front, so light client failures show
        // up before the chunks are applied.
        let (state, commit) = tokio::try_join!(
            self.state_provider.state(snapshot.height),
            self.state_provider.commit(snapshot.height),
        )
        .map_err(|err| rejected(snapshot, RejectReason::Provider(err.to_string())))?;

        let mut snapshot_retries = 0;

        loop {
            match self.apply_chunks(snapshot).await? {
                Restored::Complete => break,
                Restored::RetrySnapshot => {
                    snapshot_retries += 1;
                    if snapshot_retries > self.config.snapshot_retry_limit {
                        return Err(rejected(snapshot, RejectReason::SnapshotRetriesExhausted));
                    }

                    info!(
                        height = snapshot.height,
                        format = snapshot.format,
                        attempt = snapshot_retries,
                        "Retrying snapshot from the first chunk"
                    );
                    if let Some(queue) = self.restore.lock().as_mut() {
                        queue.retry_all();
                    }
                    self.fetch_wake.notify_one();

                    self.offer_snapshot(snapshot, app_hash).await?;
                }
            }
        }

        self.verify_app(snapshot, app_hash, state.version.consensus.app)
            .await?;

        info!(
            height = snapshot.height,
            format = snapshot.format,
            hash = %hex::encode_upper(&snapshot.hash),
            "Snapshot restored"
        );

        Ok((state, commit))
    }

    async fn offer_snapshot(&self, snapshot: &Snapshot, app_hash: Hash) -> Result<(), SyncError> {
        info!(
            height = snapshot.height,
            format = snapshot.format,
            hash = %hex::encode_upper(&snapshot.hash),
            "Offering snapshot to the application"
        );

        let result = self
            .conn
            .offer_snapshot(snapshot, app_hash)
            .await
            .map_err(SyncError::Application)?;

        match result {
            OfferSnapshotResult::Accept => {
                info!(height = snapshot.height, format = snapshot.format, "Snapshot accepted, restoring");
                Ok(())
            }
            OfferSnapshotResult::Abort => Err(SyncError::Aborted),
            OfferSnapshotResult::Reject => Err(rejected(snapshot, RejectReason::Snapshot)),
            OfferSnapshotResult::RejectFormat => Err(rejected(snapshot, RejectReason::Format)),
            OfferSnapshotResult::RejectSender => Err(rejected(snapshot, RejectReason::Sender)),
        }
    }

    /// Feeds chunks to the application in index order until the snapshot is
    /// complete or the application asks for it to be restarted.
    async fn apply_chunks(&self, snapshot: &Snapshot) -> Result<Restored, SyncError> {
        let key = snapshot.key();

        loop {
            let next = {
                let restore = self.restore.lock();
                let queue = restore.as_ref().ok_or(SyncError::NoRestoreInProgress)?;

                if queue.is_complete() {
                    return Ok(Restored::Complete);
                }
                if let Some(index) = queue.fetch_exhausted(self.config.chunk_fetch_limit) {
                    return Err(rejected(snapshot, RejectReason::FetchRetriesExhausted { index }));
                }

                queue.next()
            };

            let Some(chunk) = next else {
                if self.snapshots.lock().peers_for(&key).is_empty() {
                    return Err(rejected(snapshot, RejectReason::NoPeers));
                }
                // Recheck on every tick even without arrivals, so lost
                // peers and exhausted fetches are noticed.
                let _ = timeout(self.config.fetch_tick(), self.chunk_ready.notified()).await;
                continue;
            };

            let index = chunk.index;
            debug!(height = key.height, format = key.format, index, sender = %chunk.sender, "Applying chunk");

            let response = self
                .conn
                .apply_snapshot_chunk(index, chunk.data, chunk.sender)
                .await
                .map_err(SyncError::Application)?;

            if response.result == ApplyChunkResult::Abort {
                return Err(SyncError::Aborted);
            }

            // Applied before senders are discarded, so rejecting the sender
            // of this very chunk does not undo it.
            if response.result == ApplyChunkResult::Accept {
                let mut restore = self.restore.lock();
                let queue = restore.as_mut().ok_or(SyncError::NoRestoreInProgress)?;
                if queue.mark_applied(index) {
                    self.metrics.chunks_applied.inc();
                    debug!(index, applied = queue.applied(), total = queue.len(), "Applied chunk");
                }
            }

            for peer in &response.reject_senders {
                info!(%peer, "Application rejected chunk sender");
                self.snapshots.lock().reject_peer(peer);
                if let Some(queue) = self.restore.lock().as_mut() {
                    let discarded = queue.discard_sender(peer);
                    debug!(%peer, ?discarded, "Discarded chunks from rejected sender");
                }
            }

            let mut restore = self.restore.lock();
            let queue = restore.as_mut().ok_or(SyncError::NoRestoreInProgress)?;

            for &refetch in &response.refetch_chunks {
                if queue.refetch(refetch) {
                    debug!(index = refetch, "Refetching chunk");
                }
            }

            match response.result {
                ApplyChunkResult::Accept => {}
                ApplyChunkResult::Retry => {
                    let retries = queue.retry(index);
                    if retries > self.config.chunk_retry_limit {
                        return Err(rejected(snapshot, RejectReason::ChunkRetriesExhausted { index }));
                    }
                    debug!(index, retries, "Application asked to retry chunk");
                }
                ApplyChunkResult::RetrySnapshot => return Ok(Restored::RetrySnapshot),
                ApplyChunkResult::RejectSnapshot => {
                    return Err(rejected(snapshot, RejectReason::ChunkRejected { index }));
                }
                ApplyChunkResult::Abort => return Err(SyncError::Aborted),
            }

            drop(restore);
            self.fetch_wake.notify_one();
        }
    }

    /// Checks the restored application against the trusted state.
    async fn verify_app(
        &self,
        snapshot: &Snapshot,
        app_hash: Hash,
        app_version: u64,
    ) -> Result<(), SyncError> {
        let info = self
            .conn_query
            .info()
            .await
            .map_err(SyncError::Application)?;

        let failed = |reason: String| SyncError::VerificationFailed {
            height: snapshot.height,
            reason,
        };

        if info.app_version != app_version {
            return Err(failed(format!(
                "app version mismatch, expected {app_version}, got {}",
                info.app_version
            )));
        }
        if info.last_block_height != snapshot.height {
            return Err(failed(format!(
                "app reported height {}, expected {}",
                info.last_block_height, snapshot.height
            )));
        }
        if info.last_block_app_hash != app_hash {
            return Err(failed(format!(
                "app hash mismatch, expected {app_hash}, got {}",
                info.last_block_app_hash
            )));
        }

        info!(height = snapshot.height, %app_hash, "Verified restored application state");

        Ok(())
    }

    /// Keeps up to `chunk_fetchers` chunk requests in flight until cancelled.
    async fn fetch_chunks(self: Arc<Self>, key: SnapshotKey, cancel: CancellationToken) {
        let mut tick = interval(self.config.fetch_tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            self.request_chunks(key);

            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.fetch_wake.notified() => {}
                _ = tick.tick() => {}
            }
        }

        debug!(height = key.height, format = key.format, "Stopped fetching chunks");
    }

    fn request_chunks(&self, key: SnapshotKey) {
        let mut peers = self.snapshots.lock().peers_for(&key);
        if peers.is_empty() {
            return;
        }
        peers.shuffle(&mut rand::thread_rng());

        let now = Instant::now();
        let mut requests = Vec::new();

        {
            let mut restore = self.restore.lock();
            let Some(queue) = restore.as_mut().filter(|queue| queue.snapshot() == key) else {
                return;
            };

            for (index, peer) in queue.expire(now) {
                self.metrics.chunk_timeouts.inc();
                debug!(index, %peer, "Chunk request timed out");
            }

            while queue.in_flight() < self.config.chunk_fetchers {
                let assigned = peers
                    .iter()
                    .find_map(|&peer| queue.allocate(peer, now).map(|index| (index, peer)))
                    .or_else(|| match peers.as_slice() {
                        [only] => queue.allocate_repeat(*only, now).map(|index| (index, *only)),
                        _ => None,
                    });

                let Some(request) = assigned else {
                    break;
                };
                requests.push(request);
                peers.rotate_left(1);
            }
        }

        for (index, peer) in requests {
            debug!(height = key.height, format = key.format, index, %peer, "Requesting chunk");

            let request = Message::ChunkRequest(ChunkRequest {
                height: key.height,
                format: key.format,
                index,
            });

            if !self.switch.send(&peer, request) {
                debug!(index, %peer, "Failed to queue chunk request");
                if let Some(queue) = self.restore.lock().as_mut() {
                    let _ = queue.on_timeout(index);
                }
            }
        }
    }
}

fn rejected(snapshot: &Snapshot, reason: RejectReason) -> SyncError {
    SyncError::CandidateRejected {
        height: snapshot.height,
        format: snapshot.format,
        reason,
    }
}
