//! Protocol version information carried in the recovered state.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Block protocol version spoken by this node.
pub const BLOCK_PROTOCOL: u64 = 11;

/// Software version recorded in states built by this node.
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Consensus-level versions: the block protocol and the application protocol.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ConsensusVersion {
    pub block: u64,
    pub app: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Version {
    pub consensus: ConsensusVersion,
    pub software: String,
}

impl Version {
    /// Version for a state produced by this build, running application
    /// protocol `app`.
    #[must_use]
    pub fn current(app: u64) -> Self {
        Self {
            consensus: ConsensusVersion {
                block: BLOCK_PROTOCOL,
                app,
            },
            software: SOFTWARE_VERSION.to_owned(),
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(block {}) (app {}) (software {})",
            self.consensus.block, self.consensus.app, self.software,
        )
    }
}
