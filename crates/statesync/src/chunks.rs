//! Per-index bookkeeping for the snapshot being restored.
//!
//! Every index is in exactly one of four states:
//!
//! ```text
//!   Needed ──allocate──▶ InFlight ──response──▶ Received ──apply──▶ Applied
//!     ▲                     │                       │                  │
//!     └──timeout / missing──┘                       └──retry / refetch─┘
//! ```
//!
//! Chunks are applied strictly in index order: [`ChunkQueue::next`] only
//! yields the lowest index not yet applied, and only once it has arrived.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use statesync_primitives::PeerId;
use tokio::time::Instant;

use crate::snapshots::{Snapshot, SnapshotKey};

/// A received chunk ready to be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub data: Bytes,
    pub sender: PeerId,
}

/// State of an index that is not simply needed. Indices without a slot are
/// needed.
#[derive(Clone, Debug)]
enum Slot {
    InFlight { peer: PeerId, deadline: Instant },
    Received { data: Bytes, sender: PeerId },
    Applied,
}

/// Only indices that have been touched take up memory, so the advertised
/// chunk count costs nothing up front.
#[derive(Debug)]
pub struct ChunkQueue {
    snapshot: SnapshotKey,
    chunks: u32,
    timeout: Duration,
    slots: BTreeMap<u32, Slot>,
    /// Every index below this one is applied.
    applied_up_to: u32,
    /// Peer each index was last requested from.
    requested_from: HashMap<u32, PeerId>,
    fetch_failures: HashMap<u32, u32>,
    apply_retries: HashMap<u32, u32>,
}

impl ChunkQueue {
    #[must_use]
    pub fn new(snapshot: &Snapshot, timeout: Duration) -> Self {
        Self {
            snapshot: snapshot.key(),
            chunks: snapshot.chunks,
            timeout,
            slots: BTreeMap::new(),
            applied_up_to: 0,
            requested_from: HashMap::new(),
            fetch_failures: HashMap::new(),
            apply_retries: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn snapshot(&self) -> SnapshotKey {
        self.snapshot
    }

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.chunks
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.chunks == 0
    }

    /// Needed indices from the applied prefix onwards.
    fn needed(&self) -> impl Iterator<Item = u32> + '_ {
        (self.applied_up_to..self.chunks).filter(move |index| !self.slots.contains_key(index))
    }

    /// Assigns the lowest needed index that was not last requested from
    /// `peer`, so a chunk that failed from one peer moves to another.
    pub fn allocate(&mut self, peer: PeerId, now: Instant) -> Option<u32> {
        let index = self
            .needed()
            .find(|index| self.requested_from.get(index) != Some(&peer))?;
        self.assign(index, peer, now);
        Some(index)
    }

    /// Like [`allocate`](Self::allocate), but may hand `peer` an index it
    /// already failed. Only useful when `peer` is the sole source.
    pub fn allocate_repeat(&mut self, peer: PeerId, now: Instant) -> Option<u32> {
        let index = self.needed().next()?;
        self.assign(index, peer, now);
        Some(index)
    }

    fn assign(&mut self, index: u32, peer: PeerId, now: Instant) {
        let _ = self.slots.insert(
            index,
            Slot::InFlight {
                peer,
                deadline: now + self.timeout,
            },
        );
        let _ = self.requested_from.insert(index, peer);
    }

    /// Records a response for `index` from `peer`; `None` means the peer
    /// reported the chunk missing. Returns whether the response was used.
    ///
    /// Contents are taken from any peer as long as the index is still
    /// outstanding. A missing report only counts from the peer the chunk is
    /// in flight to.
    pub fn on_response(&mut self, index: u32, peer: PeerId, data: Option<Bytes>) -> bool {
        if index >= self.chunks {
            return false;
        }

        match (data, self.slots.get(&index)) {
            (Some(data), None | Some(Slot::InFlight { .. })) => {
                let _ = self.slots.insert(index, Slot::Received { data, sender: peer });
                true
            }
            (None, Some(Slot::InFlight { peer: assigned, .. })) if *assigned == peer => {
                let _ = self.slots.remove(&index);
                *self.fetch_failures.entry(index).or_default() += 1;
                true
            }
            _ => false,
        }
    }

    /// Returns an in-flight index to the needed set after its deadline.
    pub fn on_timeout(&mut self, index: u32) -> bool {
        if !matches!(self.slots.get(&index), Some(Slot::InFlight { .. })) {
            return false;
        }
        let _ = self.slots.remove(&index);
        *self.fetch_failures.entry(index).or_default() += 1;
        true
    }

    /// Times out every request whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<(u32, PeerId)> {
        let expired: Vec<_> = self
            .slots
            .iter()
            .filter_map(|(&index, slot)| match slot {
                Slot::InFlight { peer, deadline } if *deadline <= now => Some((index, *peer)),
                _ => None,
            })
            .collect();

        for (index, _) in &expired {
            let _ = self.on_timeout(*index);
        }

        expired
    }

    /// Returns requests in flight to `peer` to the needed set, without
    /// counting a failure.
    pub fn release_peer(&mut self, peer: &PeerId) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| !matches!(slot, Slot::InFlight { peer: assigned, .. } if assigned == peer));
        before - self.slots.len()
    }

    /// The lowest index not yet applied, if it has arrived.
    #[must_use]
    pub fn next(&self) -> Option<Chunk> {
        match self.slots.get(&self.applied_up_to)? {
            Slot::Received { data, sender } => Some(Chunk {
                index: self.applied_up_to,
                data: data.clone(),
                sender: *sender,
            }),
            Slot::InFlight { .. } | Slot::Applied => None,
        }
    }

    pub fn mark_applied(&mut self, index: u32) -> bool {
        match self.slots.get_mut(&index) {
            Some(slot @ Slot::Received { .. }) => *slot = Slot::Applied,
            _ => return false,
        }

        while matches!(self.slots.get(&self.applied_up_to), Some(Slot::Applied)) {
            self.applied_up_to += 1;
        }
        true
    }

    /// Discards whatever is held for `index` so it is fetched again.
    pub fn refetch(&mut self, index: u32) -> bool {
        if !matches!(
            self.slots.get(&index),
            Some(Slot::Received { .. } | Slot::Applied)
        ) {
            return false;
        }
        let _ = self.slots.remove(&index);
        self.applied_up_to = self.applied_up_to.min(index);
        true
    }

    /// Refetches `index` and counts an apply retry against it. Returns the
    /// number of retries so far.
    pub fn retry(&mut self, index: u32) -> u32 {
        if index >= self.chunks {
            return 0;
        }
        let _ = self.refetch(index);
        let retries = self.apply_retries.entry(index).or_default();
        *retries += 1;
        *retries
    }

    /// Starts the snapshot over: every index is needed again and all
    /// counters reset.
    pub fn retry_all(&mut self) {
        self.slots.clear();
        self.applied_up_to = 0;
        self.requested_from.clear();
        self.fetch_failures.clear();
        self.apply_retries.clear();
    }

    /// Drops every unapplied chunk received from, or in flight to, `peer`.
    /// Returns the affected indices.
    pub fn discard_sender(&mut self, peer: &PeerId) -> Vec<u32> {
        let discarded: Vec<u32> = self
            .slots
            .iter()
            .filter(|(_, slot)| match slot {
                Slot::Received { sender, .. } => sender == peer,
                Slot::InFlight { peer: assigned, .. } => assigned == peer,
                Slot::Applied => false,
            })
            .map(|(&index, _)| index)
            .collect();

        for index in &discarded {
            let _ = self.slots.remove(index);
        }
        discarded
    }

    /// Lowest index whose failed fetches exceed `limit`.
    #[must_use]
    pub fn fetch_exhausted(&self, limit: u32) -> Option<u32> {
        self.fetch_failures
            .iter()
            .filter(|&(_, &failures)| failures > limit)
            .map(|(&index, _)| index)
            .min()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::InFlight { .. }))
            .count()
    }

    #[must_use]
    pub fn in_flight_to(&self, index: u32) -> Option<PeerId> {
        match self.slots.get(&index) {
            Some(Slot::InFlight { peer, .. }) => Some(*peer),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_needed(&self, index: u32) -> bool {
        index < self.chunks && !self.slots.contains_key(&index)
    }

    #[must_use]
    pub fn is_applied(&self, index: u32) -> bool {
        matches!(self.slots.get(&index), Some(Slot::Applied))
    }

    #[must_use]
    pub fn applied(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Applied))
            .count()
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.applied_up_to >= self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn queue(chunks: u32) -> ChunkQueue {
        let snapshot = Snapshot {
            height: 100,
            format: 1,
            chunks,
            hash: b"snapshot".to_vec(),
            metadata: vec![],
        };
        ChunkQueue::new(&snapshot, TIMEOUT)
    }

    fn data(index: u32) -> Option<Bytes> {
        Some(Bytes::from(index.to_be_bytes().to_vec()))
    }

    #[test]
    fn test_allocate_in_index_order() {
        let peer = PeerId::random();
        let now = Instant::now();
        let mut queue = queue(3);

        assert_eq!(queue.allocate(peer, now), Some(0));
        assert_eq!(queue.allocate(peer, now), Some(1));
        assert_eq!(queue.allocate(peer, now), Some(2));
        assert_eq!(queue.allocate(peer, now), None);
        assert_eq!(queue.in_flight(), 3);
    }

    #[test]
    fn test_timed_out_chunk_moves_to_another_peer() {
        let (p1, p2) = (PeerId::random(), PeerId::random());
        let now = Instant::now();
        let mut queue = queue(10);

        for index in 0..10 {
            let peer = if index == 3 { p1 } else { p2 };
            assert_eq!(queue.allocate_repeat(peer, now), Some(index));
        }
        for index in (0..10).filter(|&i| i != 3) {
            assert!(queue.on_response(index, p2, data(index)));
        }
        assert_eq!(queue.in_flight_to(3), Some(p1));

        let expired = queue.expire(now + TIMEOUT);
        assert_eq!(expired, vec![(3, p1)]);
        assert!(queue.is_needed(3));

        // Not handed back to the peer that timed out...
        assert_eq!(queue.allocate(p1, now + TIMEOUT), None);
        // ...but to the next one.
        assert_eq!(queue.allocate(p2, now + TIMEOUT), Some(3));
        assert_eq!(queue.in_flight_to(3), Some(p2));
    }

    #[test]
    fn test_expire_ignores_live_requests() {
        let peer = PeerId::random();
        let now = Instant::now();
        let mut queue = queue(2);

        assert_eq!(queue.allocate(peer, now), Some(0));
        assert!(queue.expire(now + TIMEOUT / 2).is_empty());
        assert_eq!(queue.in_flight(), 1);
    }

    #[test]
    fn test_next_applies_in_order() {
        let peer = PeerId::random();
        let mut queue = queue(3);

        assert!(queue.on_response(1, peer, data(1)));
        assert_eq!(queue.next(), None, "index 0 has not arrived");

        assert!(queue.on_response(0, peer, data(0)));
        let chunk = queue.next().unwrap();
        assert_eq!(chunk.index, 0);
        assert_eq!(chunk.sender, peer);
        assert!(queue.mark_applied(0));

        assert_eq!(queue.next().unwrap().index, 1);
        assert!(queue.mark_applied(1));
        assert_eq!(queue.next(), None);
        assert!(!queue.is_complete());

        assert!(queue.on_response(2, peer, data(2)));
        assert!(queue.mark_applied(2));
        assert!(queue.is_complete());
        assert_eq!(queue.applied(), 3);
    }

    #[test]
    fn test_duplicate_responses_are_ignored() {
        let (p1, p2) = (PeerId::random(), PeerId::random());
        let mut queue = queue(2);

        assert!(queue.on_response(0, p1, data(0)));
        assert!(!queue.on_response(0, p2, data(0)));
        assert_eq!(queue.next().unwrap().sender, p1);

        assert!(queue.mark_applied(0));
        assert!(!queue.on_response(0, p1, data(0)));
        assert!(!queue.on_response(7, p1, data(7)), "out of range");
    }

    #[test]
    fn test_missing_only_counts_from_assigned_peer() {
        let (p1, p2) = (PeerId::random(), PeerId::random());
        let now = Instant::now();
        let mut queue = queue(1);

        assert_eq!(queue.allocate(p1, now), Some(0));
        assert!(!queue.on_response(0, p2, None));
        assert_eq!(queue.in_flight_to(0), Some(p1));

        assert!(queue.on_response(0, p1, None));
        assert!(queue.is_needed(0));
        assert_eq!(queue.fetch_exhausted(0), Some(0));
        assert_eq!(queue.fetch_exhausted(1), None);
    }

    #[test]
    fn test_retry_refetches_and_counts() {
        let peer = PeerId::random();
        let mut queue = queue(2);

        assert!(queue.on_response(0, peer, data(0)));
        assert_eq!(queue.retry(0), 1);
        assert!(queue.is_needed(0));

        assert!(queue.on_response(0, peer, data(0)));
        assert!(queue.mark_applied(0));
        assert_eq!(queue.retry(0), 2);
        assert!(!queue.is_applied(0));
    }

    #[test]
    fn test_retry_all_starts_over() {
        let peer = PeerId::random();
        let now = Instant::now();
        let mut queue = queue(3);

        assert!(queue.on_response(0, peer, data(0)));
        assert!(queue.mark_applied(0));
        assert!(queue.on_response(1, peer, data(1)));
        assert_eq!(queue.allocate(peer, now), Some(2));

        queue.retry_all();

        assert!((0..3).all(|i| queue.is_needed(i)));
        assert_eq!(queue.allocate(peer, now), Some(0), "request history is cleared");
    }

    #[test]
    fn test_discard_sender_keeps_applied_chunks() {
        let (p1, p2) = (PeerId::random(), PeerId::random());
        let now = Instant::now();
        let mut queue = queue(4);

        assert!(queue.on_response(0, p1, data(0)));
        assert!(queue.mark_applied(0));
        assert!(queue.on_response(1, p1, data(1)));
        assert!(queue.on_response(2, p2, data(2)));
        assert_eq!(queue.allocate(p1, now), Some(3));

        assert_eq!(queue.discard_sender(&p1), vec![1, 3]);
        assert!(queue.is_applied(0));
        assert!(queue.is_needed(1));
        assert!(!queue.is_needed(2));
        assert!(queue.is_needed(3));
    }

    #[test]
    fn test_advertised_chunk_count_is_not_preallocated() {
        let (p1, p2) = (PeerId::random(), PeerId::random());
        let now = Instant::now();
        let mut queue = queue(u32::MAX);

        assert_eq!(queue.len(), u32::MAX);
        assert_eq!(queue.allocate(p1, now), Some(0));
        assert_eq!(queue.allocate(p2, now), Some(1));
        assert!(queue.on_response(u32::MAX - 1, p1, data(7)));
        assert!(!queue.on_response(u32::MAX, p1, data(7)), "out of range");

        assert_eq!(queue.expire(now + TIMEOUT).len(), 2);
        // Index 0 timed out from p1, so p1 moves on to index 1.
        assert_eq!(queue.allocate(p1, now + TIMEOUT), Some(1));
        assert!(!queue.is_complete());
    }

    #[test]
    fn test_refetch_of_applied_chunk_rewinds_apply_order() {
        let peer = PeerId::random();
        let mut queue = queue(3);

        for index in 0..3 {
            assert!(queue.on_response(index, peer, data(index)));
        }
        assert!(queue.mark_applied(0));
        assert!(queue.mark_applied(1));

        assert!(queue.refetch(0));
        assert!(queue.is_needed(0));
        assert_eq!(queue.next(), None, "index 0 must arrive again first");

        assert!(queue.on_response(0, peer, data(0)));
        assert_eq!(queue.next().unwrap().index, 0);
        assert!(queue.mark_applied(0));
        assert_eq!(queue.next().unwrap().index, 2, "index 1 stays applied");
        assert!(queue.mark_applied(2));
        assert!(queue.is_complete());
    }

    #[test]
    fn test_release_peer_does_not_count_failures() {
        let peer = PeerId::random();
        let now = Instant::now();
        let mut queue = queue(2);

        assert_eq!(queue.allocate(peer, now), Some(0));
        assert_eq!(queue.release_peer(&peer), 1);
        assert!(queue.is_needed(0));
        assert_eq!(queue.fetch_exhausted(0), None);
    }
}
