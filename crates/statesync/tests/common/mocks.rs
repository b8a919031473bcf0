//! Mock implementations of the state sync collaborators

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use eyre::{bail, Result};
use statesync::{
    AppConnQuery, AppConnSnapshot, AppInfo, ApplyChunkResponse, ApplyChunkResult,
    OfferSnapshotResult, Snapshot, SnapshotKey, StateProvider, Switch,
};
use statesync_primitives::{BlockId, Commit, Hash, Height, PeerId, State, Version};
use statesync_protocol::Message;
use tokio::sync::mpsc;

pub const APP_VERSION: u64 = 1;

/// Trusted application hash the provider reports for `height`
pub fn trusted_app_hash(height: Height) -> Hash {
    Hash::digest(&height.to_be_bytes())
}

/// One chunk applied by the mock application
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedChunk {
    pub index: u32,
    pub data: Vec<u8>,
    pub sender: PeerId,
}

/// Scripted application connection
#[derive(Clone, Default)]
pub struct MockApp {
    /// Snapshots served to peers
    local_snapshots: Arc<Mutex<Vec<Snapshot>>>,
    /// Chunks served to peers
    local_chunks: Arc<Mutex<HashMap<(Height, u32, u32), Vec<u8>>>>,
    /// Offer verdicts; unlisted snapshots are accepted
    offer_results: Arc<Mutex<HashMap<SnapshotKey, OfferSnapshotResult>>>,
    /// Apply verdicts per index, consumed in order; then accept
    apply_script: Arc<Mutex<HashMap<u32, VecDeque<ApplyChunkResponse>>>>,
    /// Heights at which the restored app reports a wrong app hash
    corrupt_heights: Arc<Mutex<HashSet<Height>>>,
    offers: Arc<Mutex<Vec<SnapshotKey>>>,
    applied: Arc<Mutex<Vec<AppliedChunk>>>,
    restored: Arc<Mutex<Option<(Height, Hash)>>>,
}

impl MockApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local_snapshot(&self, snapshot: Snapshot, chunks: &[Vec<u8>]) {
        let mut local_chunks = self.local_chunks.lock().unwrap();
        for (index, chunk) in chunks.iter().enumerate() {
            let _ = local_chunks.insert(
                (snapshot.height, snapshot.format, index as u32),
                chunk.clone(),
            );
        }
        self.local_snapshots.lock().unwrap().push(snapshot);
    }

    pub fn set_offer_result(&self, key: SnapshotKey, result: OfferSnapshotResult) {
        let _ = self.offer_results.lock().unwrap().insert(key, result);
    }

    pub fn script_apply(&self, index: u32, response: ApplyChunkResponse) {
        self.apply_script
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .push_back(response);
    }

    pub fn corrupt_at(&self, height: Height) {
        let _ = self.corrupt_heights.lock().unwrap().insert(height);
    }

    pub fn offers(&self) -> Vec<SnapshotKey> {
        self.offers.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<AppliedChunk> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_indices(&self) -> Vec<u32> {
        self.applied().iter().map(|chunk| chunk.index).collect()
    }
}

#[async_trait]
impl AppConnSnapshot for MockApp {
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        Ok(self.local_snapshots.lock().unwrap().clone())
    }

    async fn offer_snapshot(
        &self,
        snapshot: &Snapshot,
        app_hash: Hash,
    ) -> Result<OfferSnapshotResult> {
        self.offers.lock().unwrap().push(snapshot.key());

        let result = self
            .offer_results
            .lock()
            .unwrap()
            .get(&snapshot.key())
            .copied()
            .unwrap_or(OfferSnapshotResult::Accept);

        if result == OfferSnapshotResult::Accept {
            self.applied.lock().unwrap().clear();
            *self.restored.lock().unwrap() = Some((snapshot.height, app_hash));
        }

        Ok(result)
    }

    async fn load_snapshot_chunk(
        &self,
        height: Height,
        format: u32,
        index: u32,
    ) -> Result<Option<Bytes>> {
        Ok(self
            .local_chunks
            .lock()
            .unwrap()
            .get(&(height, format, index))
            .cloned()
            .map(Bytes::from))
    }

    async fn apply_snapshot_chunk(
        &self,
        index: u32,
        chunk: Bytes,
        sender: PeerId,
    ) -> Result<ApplyChunkResponse> {
        self.applied.lock().unwrap().push(AppliedChunk {
            index,
            data: chunk.to_vec(),
            sender,
        });

        let scripted = self
            .apply_script
            .lock()
            .unwrap()
            .get_mut(&index)
            .and_then(VecDeque::pop_front);

        Ok(scripted.unwrap_or_else(|| ApplyChunkResponse::new(ApplyChunkResult::Accept)))
    }
}

#[async_trait]
impl AppConnQuery for MockApp {
    async fn info(&self) -> Result<AppInfo> {
        let Some((height, app_hash)) = *self.restored.lock().unwrap() else {
            bail!("nothing restored");
        };

        let last_block_app_hash = if self.corrupt_heights.lock().unwrap().contains(&height) {
            Hash::ZERO
        } else {
            app_hash
        };

        Ok(AppInfo {
            last_block_height: height,
            last_block_app_hash,
            app_version: APP_VERSION,
        })
    }
}

/// Trust provider answering for every height, except those set to fail
#[derive(Clone, Default)]
pub struct FixedStateProvider {
    failing: Arc<Mutex<HashSet<Height>>>,
}

impl FixedStateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(&self, height: Height) {
        let _ = self.failing.lock().unwrap().insert(height);
    }

    fn check(&self, height: Height) -> Result<()> {
        if self.failing.lock().unwrap().contains(&height) {
            bail!("light client verification failed at height {height}");
        }
        Ok(())
    }
}

#[async_trait]
impl StateProvider for FixedStateProvider {
    async fn app_hash(&self, height: Height) -> Result<Hash> {
        self.check(height)?;
        Ok(trusted_app_hash(height))
    }

    async fn state(&self, height: Height) -> Result<State> {
        self.check(height)?;
        Ok(State {
            version: Version::current(APP_VERSION),
            chain_id: "test-chain".to_owned(),
            initial_height: 1,
            last_block_height: height,
            app_hash: trusted_app_hash(height),
            ..State::default()
        })
    }

    async fn commit(&self, height: Height) -> Result<Commit> {
        self.check(height)?;
        Ok(Commit {
            height,
            round: 0,
            block_id: BlockId::default(),
            signatures: vec![],
        })
    }
}

/// Switch that forwards outbound messages to a channel and records
/// disconnects
#[derive(Clone)]
pub struct MockSwitch {
    peers: Arc<Mutex<Vec<PeerId>>>,
    outbox: mpsc::UnboundedSender<(PeerId, Message)>,
    broadcasts: Arc<Mutex<usize>>,
    stopped: Arc<Mutex<Vec<(PeerId, String)>>>,
}

impl MockSwitch {
    pub fn new(peers: Vec<PeerId>) -> (Self, mpsc::UnboundedReceiver<(PeerId, Message)>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let switch = Self {
            peers: Arc::new(Mutex::new(peers)),
            outbox,
            broadcasts: Arc::default(),
            stopped: Arc::default(),
        };
        (switch, rx)
    }

    pub fn broadcasts(&self) -> usize {
        *self.broadcasts.lock().unwrap()
    }

    pub fn stopped(&self) -> Vec<PeerId> {
        self.stopped
            .lock()
            .unwrap()
            .iter()
            .map(|(peer, _)| *peer)
            .collect()
    }
}

impl Switch for MockSwitch {
    fn send(&self, peer: &PeerId, message: Message) -> bool {
        if !self.peers.lock().unwrap().contains(peer) {
            return false;
        }
        self.outbox.send((*peer, message)).is_ok()
    }

    fn broadcast(&self, message: Message) {
        *self.broadcasts.lock().unwrap() += 1;
        for peer in self.peers.lock().unwrap().iter() {
            let _ = self.outbox.send((*peer, message.clone()));
        }
    }

    fn stop_peer_for_error(&self, peer: &PeerId, reason: &str) {
        self.stopped
            .lock()
            .unwrap()
            .push((*peer, reason.to_owned()));
    }
}
