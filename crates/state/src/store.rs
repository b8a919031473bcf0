//! Storage interfaces for blocks and consensus state.
//!
//! Block and state persistence are separate stores and do not commit
//! atomically with each other; see [`crate::rollback`] for the recovery path.

use eyre::Result;
use statesync_primitives::{BlockMeta, ConsensusParams, Height, State, ValidatorSet};

pub trait BlockStore {
    /// Height of the latest stored block, `0` if empty.
    fn height(&self) -> Height;

    fn load_block_meta(&self, height: Height) -> Result<Option<BlockMeta>>;

    /// Removes the block at [`BlockStore::height`].
    fn delete_latest_block(&mut self) -> Result<()>;
}

pub trait StateStore {
    /// The current state, `None` if nothing has been persisted yet.
    fn load(&self) -> Result<Option<State>>;

    /// Validator set active at `height`.
    fn load_validators(&self, height: Height) -> Result<ValidatorSet>;

    /// Consensus parameters active at `height`.
    fn load_consensus_params(&self, height: Height) -> Result<ConsensusParams>;

    /// Persists `state` as the current state, along with the validator sets
    /// and consensus parameters it implies for the following heights.
    fn save(&mut self, state: &State) -> Result<()>;
}
