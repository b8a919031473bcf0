//! Pool of snapshots advertised by peers.
//!
//! Snapshots are identified by `(height, format)`. The pool remembers which
//! peers advertise each snapshot and what the application has rejected, so
//! that rejected snapshots, formats and peers are never offered again.

use std::collections::{BTreeMap, HashSet};

use statesync_primitives::{Height, PeerId};
use statesync_protocol::SnapshotsResponse;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub height: Height,
    pub format: u32,
}

impl SnapshotKey {
    #[must_use]
    pub const fn new(height: Height, format: u32) -> Self {
        Self { height, format }
    }
}

/// A snapshot as advertised on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub height: Height,
    pub format: u32,
    pub chunks: u32,
    /// Application-defined, compared byte for byte.
    pub hash: Vec<u8>,
    /// Opaque to state sync, interpreted by the application.
    pub metadata: Vec<u8>,
}

impl Snapshot {
    #[must_use]
    pub const fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.height, self.format)
    }
}

impl From<SnapshotsResponse> for Snapshot {
    fn from(msg: SnapshotsResponse) -> Self {
        Self {
            height: msg.height,
            format: msg.format,
            chunks: msg.chunks,
            hash: msg.hash,
            metadata: msg.metadata,
        }
    }
}

impl From<&Snapshot> for SnapshotsResponse {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            height: snapshot.height,
            format: snapshot.format,
            chunks: snapshot.chunks,
            hash: snapshot.hash.clone(),
            metadata: snapshot.metadata.clone(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    snapshot: Snapshot,
    peers: HashSet<PeerId>,
}

#[derive(Debug, Default)]
pub struct SnapshotPool {
    /// Ordered by key, so the best candidate is the last entry.
    snapshots: BTreeMap<SnapshotKey, Entry>,
    rejected: HashSet<SnapshotKey>,
    rejected_formats: HashSet<u32>,
    rejected_peers: HashSet<PeerId>,
}

impl SnapshotPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `peer` advertises `snapshot`. Returns `true` only if the
    /// snapshot was not known before.
    ///
    /// Advertisements of rejected snapshots or formats, or from rejected
    /// peers, are ignored. A second advertisement for a known key with
    /// different contents is ignored too; the first one wins.
    pub fn add(&mut self, peer: PeerId, snapshot: Snapshot) -> bool {
        let key = snapshot.key();

        if self.rejected.contains(&key) {
            debug!(height = key.height, format = key.format, %peer, "Ignoring rejected snapshot");
            return false;
        }
        if self.rejected_formats.contains(&key.format) {
            debug!(height = key.height, format = key.format, %peer, "Ignoring snapshot of rejected format");
            return false;
        }
        if self.rejected_peers.contains(&peer) {
            debug!(height = key.height, format = key.format, %peer, "Ignoring snapshot from rejected peer");
            return false;
        }

        if let Some(entry) = self.snapshots.get_mut(&key) {
            if entry.snapshot != snapshot {
                warn!(
                    height = key.height,
                    format = key.format,
                    %peer,
                    known_hash = %hex::encode_upper(&entry.snapshot.hash),
                    advertised_hash = %hex::encode_upper(&snapshot.hash),
                    "Ignoring conflicting snapshot advertisement"
                );
                return false;
            }
            let _ = entry.peers.insert(peer);
            return false;
        }

        let _ = self.snapshots.insert(
            key,
            Entry {
                snapshot,
                peers: HashSet::from([peer]),
            },
        );

        true
    }

    /// Highest height first, then highest format.
    #[must_use]
    pub fn best(&self) -> Option<Snapshot> {
        self.ranked().into_iter().next()
    }

    /// All usable snapshots, best first.
    #[must_use]
    pub fn ranked(&self) -> Vec<Snapshot> {
        self.snapshots
            .iter()
            .rev()
            .filter(|(key, _)| !self.is_rejected(key))
            .map(|(_, entry)| entry.snapshot.clone())
            .collect()
    }

    #[must_use]
    pub fn get(&self, key: &SnapshotKey) -> Option<&Snapshot> {
        self.snapshots.get(key).map(|entry| &entry.snapshot)
    }

    /// Peers currently advertising `key`.
    #[must_use]
    pub fn peers_for(&self, key: &SnapshotKey) -> Vec<PeerId> {
        self.snapshots
            .get(key)
            .map(|entry| entry.peers.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_rejected(&self, key: &SnapshotKey) -> bool {
        self.rejected.contains(key) || self.rejected_formats.contains(&key.format)
    }

    #[must_use]
    pub fn is_peer_rejected(&self, peer: &PeerId) -> bool {
        self.rejected_peers.contains(peer)
    }

    /// Forgets `key`; a later advertisement may add it back.
    pub fn remove(&mut self, key: &SnapshotKey) -> Option<Snapshot> {
        self.snapshots.remove(key).map(|entry| entry.snapshot)
    }

    /// Drops `key` and never accepts it again.
    pub fn reject(&mut self, key: &SnapshotKey) {
        let _ = self.rejected.insert(*key);
        let _ = self.snapshots.remove(key);
    }

    /// Drops every snapshot of `format` and never accepts the format again.
    pub fn reject_format(&mut self, format: u32) {
        let _ = self.rejected_formats.insert(format);
        self.snapshots.retain(|key, _| key.format != format);
    }

    /// Forgets `peer` and ignores its future advertisements.
    pub fn reject_peer(&mut self, peer: &PeerId) {
        let _ = self.rejected_peers.insert(*peer);
        self.remove_peer(peer);
    }

    /// Forgets `peer`; snapshots left with no peers are dropped.
    pub fn remove_peer(&mut self, peer: &PeerId) {
        self.snapshots.retain(|_, entry| {
            let _ = entry.peers.remove(peer);
            !entry.peers.is_empty()
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
