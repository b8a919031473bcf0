use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::block::BlockId;
use crate::hash::Hash;
use crate::params::ConsensusParams;
use crate::validator::ValidatorSet;
use crate::version::Version;
use crate::Height;

/// Consensus state of a node as of `last_block_height`.
///
/// Produced by state sync (from trusted headers) and by rollback (from the
/// block store); the caller persists it together with the matching commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct State {
    pub version: Version,

    // immutable
    pub chain_id: String,
    pub initial_height: Height,

    pub last_block_height: Height,
    pub last_block_id: BlockId,
    /// Nanoseconds since the unix epoch.
    pub last_block_time: u64,

    /// Validators for `last_block_height + 2`.
    pub next_validators: ValidatorSet,
    /// Validators for `last_block_height + 1`.
    pub validators: ValidatorSet,
    /// Validators that signed `last_block_height`.
    pub last_validators: ValidatorSet,
    pub last_height_validators_changed: Height,

    pub consensus_params: ConsensusParams,
    pub last_height_consensus_params_changed: Height,

    pub last_results_hash: Hash,
    pub app_hash: Hash,
}

impl State {
    /// A state without validators has never been initialised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}
