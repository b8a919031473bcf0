//! Peer messages and their borsh wire encoding.

use borsh::{BorshDeserialize, BorshSerialize};
use statesync_primitives::Height;

use crate::channel::{ChannelId, MAX_CHUNK_SIZE};
use crate::error::ValidationError;

/// Advertisement of one snapshot the sender can serve.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SnapshotsResponse {
    pub height: Height,
    pub format: u32,
    pub chunks: u32,
    pub hash: Vec<u8>,
    pub metadata: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChunkRequest {
    pub height: Height,
    pub format: u32,
    pub index: u32,
}

/// Contents of one chunk, or `missing` if the sender could not load it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChunkResponse {
    pub height: Height,
    pub format: u32,
    pub index: u32,
    pub chunk: Vec<u8>,
    pub missing: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    SnapshotsRequest,
    SnapshotsResponse(SnapshotsResponse),
    ChunkRequest(ChunkRequest),
    ChunkResponse(ChunkResponse),
}

impl Message {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SnapshotsRequest => "SnapshotsRequest",
            Self::SnapshotsResponse(_) => "SnapshotsResponse",
            Self::ChunkRequest(_) => "ChunkRequest",
            Self::ChunkResponse(_) => "ChunkResponse",
        }
    }

    /// The only channel this message may travel on.
    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        match self {
            Self::SnapshotsRequest | Self::SnapshotsResponse(_) => ChannelId::Snapshot,
            Self::ChunkRequest(_) | Self::ChunkResponse(_) => ChannelId::Chunk,
        }
    }

    /// Checks that the message is well formed and was received on `channel`.
    pub fn validate(&self, channel: ChannelId) -> Result<(), ValidationError> {
        let expected = self.channel();
        if expected != channel {
            return Err(ValidationError::WrongChannel {
                message: self.name(),
                expected,
                actual: channel,
            });
        }

        match self {
            Self::SnapshotsRequest | Self::ChunkRequest(_) => {}
            Self::SnapshotsResponse(msg) => {
                if msg.chunks == 0 {
                    return Err(ValidationError::NoChunks);
                }
                if msg.hash.is_empty() {
                    return Err(ValidationError::MissingHash);
                }
            }
            Self::ChunkResponse(msg) => {
                if msg.missing && !msg.chunk.is_empty() {
                    return Err(ValidationError::MissingChunkHasContents);
                }
                if msg.chunk.len() > MAX_CHUNK_SIZE {
                    return Err(ValidationError::ChunkTooLarge {
                        size: msg.chunk.len(),
                        max: MAX_CHUNK_SIZE,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        // Writing into a Vec cannot fail.
        borsh::to_vec(self).unwrap_or_default()
    }

    /// Decodes a message received on `channel` and validates it.
    ///
    /// The size limit is checked before any parsing happens.
    pub fn decode(channel: ChannelId, bytes: &[u8]) -> Result<Self, ValidationError> {
        let max = channel.recv_message_capacity();
        if bytes.len() > max {
            return Err(ValidationError::MessageTooLarge {
                size: bytes.len(),
                max,
            });
        }

        let message = Self::try_from_slice(bytes)?;
        message.validate(channel)?;

        Ok(message)
    }
}
