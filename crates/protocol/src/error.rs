use thiserror::Error;

use crate::channel::ChannelId;

/// A peer sent something that is not a well-formed state sync message for
/// the channel it arrived on. Always a protocol violation by that peer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("unknown channel {0:#04x}")]
    UnknownChannel(u8),

    #[error("{message} is not allowed on the {actual} channel (expected {expected})")]
    WrongChannel {
        message: &'static str,
        expected: ChannelId,
        actual: ChannelId,
    },

    #[error("message of {size} bytes exceeds the {max} byte limit of the channel")]
    MessageTooLarge { size: usize, max: usize },

    #[error("snapshot has no chunks")]
    NoChunks,

    #[error("snapshot has no hash")]
    MissingHash,

    #[error("missing chunk cannot have contents")]
    MissingChunkHasContents,

    #[error("chunk of {size} bytes exceeds the {max} byte limit")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("failed to decode message")]
    Decode(#[from] std::io::Error),
}
