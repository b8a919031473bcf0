use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::hash::Hash;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct BlockParams {
    pub max_bytes: i64,
    pub max_gas: i64,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            max_bytes: 4 * 1024 * 1024,
            max_gas: -1,
        }
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct VersionParams {
    /// Application protocol version.
    pub app: u64,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ConsensusParams {
    pub block: BlockParams,
    pub version: VersionParams,
}

impl ConsensusParams {
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(&self.block.max_bytes.to_be_bytes());
        buf.extend_from_slice(&self.block.max_gas.to_be_bytes());
        buf.extend_from_slice(&self.version.app.to_be_bytes());
        Hash::digest(&buf)
    }
}
