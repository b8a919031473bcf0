//! Connections to the local application.
//!
//! The snapshot connection serves and restores snapshots; the query
//! connection reports what the application believes its state to be.

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use statesync_primitives::{Hash, Height, PeerId};

use crate::snapshots::Snapshot;

/// Verdict on a snapshot offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferSnapshotResult {
    /// Restore this snapshot.
    Accept,
    /// Stop state sync entirely.
    Abort,
    /// Try another snapshot.
    Reject,
    /// Try a snapshot of another format.
    RejectFormat,
    /// Try a snapshot from other peers.
    RejectSender,
}

/// Verdict on one applied chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyChunkResult {
    Accept,
    /// Stop state sync entirely.
    Abort,
    /// Fetch and apply this chunk again.
    Retry,
    /// Restart the snapshot from the first chunk.
    RetrySnapshot,
    /// Give up on this snapshot.
    RejectSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyChunkResponse {
    pub result: ApplyChunkResult,
    /// Chunks to discard and fetch again, regardless of `result`.
    pub refetch_chunks: Vec<u32>,
    /// Peers whose chunks can't be trusted.
    pub reject_senders: Vec<PeerId>,
}

impl ApplyChunkResponse {
    #[must_use]
    pub const fn new(result: ApplyChunkResult) -> Self {
        Self {
            result,
            refetch_chunks: Vec::new(),
            reject_senders: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppInfo {
    pub last_block_height: Height,
    pub last_block_app_hash: Hash,
    pub app_version: u64,
}

#[async_trait]
pub trait AppConnSnapshot: Send + Sync {
    /// Snapshots the application can serve to peers.
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>>;

    /// Offers `snapshot` for restore. `app_hash` is the trusted application
    /// hash the restored state must end up with.
    async fn offer_snapshot(&self, snapshot: &Snapshot, app_hash: Hash)
        -> Result<OfferSnapshotResult>;

    /// Loads one chunk of a local snapshot, `None` if it does not exist.
    async fn load_snapshot_chunk(
        &self,
        height: Height,
        format: u32,
        index: u32,
    ) -> Result<Option<Bytes>>;

    async fn apply_snapshot_chunk(
        &self,
        index: u32,
        chunk: Bytes,
        sender: PeerId,
    ) -> Result<ApplyChunkResponse>;
}

#[async_trait]
pub trait AppConnQuery: Send + Sync {
    async fn info(&self) -> Result<AppInfo>;
}
