use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::Height;

/// Header of the part set a block was gossiped in.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct BlockId {
    pub hash: Hash,
    pub part_set_header: PartSetHeader,
}

impl BlockId {
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.hash.is_zero() && self.part_set_header.hash.is_zero()
    }
}

/// The subset of a block header that state reconstruction depends on.
///
/// `app_hash` and `last_results_hash` describe the execution of the
/// *previous* block: they are only agreed upon one height later.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Header {
    pub chain_id: String,
    pub height: Height,
    /// Nanoseconds since the unix epoch.
    pub time: u64,
    pub last_block_id: BlockId,
    pub validators_hash: Hash,
    pub next_validators_hash: Hash,
    pub consensus_hash: Hash,
    pub app_hash: Hash,
    pub last_results_hash: Hash,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub block_size: u64,
    pub header: Header,
    pub num_txs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct CommitSig {
    pub validator_address: Hash,
    /// Nanoseconds since the unix epoch.
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

/// Signatures of +2/3 of the voting power over a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Commit {
    pub height: Height,
    pub round: u32,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}
