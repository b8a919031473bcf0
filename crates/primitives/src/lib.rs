//! Value types shared by the state sync engine, its wire protocol and the
//! state stores: hashes, block metadata, validator sets, consensus
//! parameters and the recovered [`State`]/[`Commit`] pair.

pub mod block;
pub mod hash;
pub mod params;
pub mod state;
pub mod validator;
pub mod version;

pub use block::{BlockId, BlockMeta, Commit, CommitSig, Header, PartSetHeader};
pub use hash::Hash;
/// Opaque, comparable peer identity handed out by the transport.
pub use libp2p_identity::PeerId;
pub use params::ConsensusParams;
pub use state::State;
pub use validator::{Validator, ValidatorSet};
pub use version::Version;

/// Block height.
pub type Height = u64;
