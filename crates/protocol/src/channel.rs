//! The two logical channels state sync runs over.
//!
//! Snapshot metadata travels on a small, high priority channel; chunk
//! payloads on a large, lower priority one. The transport enforces the
//! capacities declared in [`ChannelDescriptor`].

use std::fmt;

use crate::error::ValidationError;

/// Maximum size of a message on the snapshot channel (4 MB).
pub const SNAPSHOT_MSG_SIZE: usize = 4_000_000;

/// Maximum size of a message on the chunk channel (16 MB).
pub const CHUNK_MSG_SIZE: usize = 16_000_000;

/// Upper bound on a chunk payload, leaving room for the envelope fields.
pub const MAX_CHUNK_SIZE: usize = CHUNK_MSG_SIZE - 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChannelId {
    /// Snapshot metadata: requests and advertisements.
    Snapshot = 0x60,
    /// Chunk requests and chunk contents.
    Chunk = 0x61,
}

impl ChannelId {
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Largest message the channel accepts.
    #[must_use]
    pub const fn recv_message_capacity(self) -> usize {
        match self {
            Self::Snapshot => SNAPSHOT_MSG_SIZE,
            Self::Chunk => CHUNK_MSG_SIZE,
        }
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x60 => Ok(Self::Snapshot),
            0x61 => Ok(Self::Chunk),
            other => Err(ValidationError::UnknownChannel(other)),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => write!(f, "snapshot({:#04x})", self.as_byte()),
            Self::Chunk => write!(f, "chunk({:#04x})", self.as_byte()),
        }
    }
}

/// What the transport needs to know to multiplex a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub id: ChannelId,
    pub priority: u8,
    pub send_queue_capacity: usize,
    pub recv_message_capacity: usize,
}

/// Descriptors for every channel the state sync reactor listens on.
#[must_use]
pub const fn channel_descriptors() -> [ChannelDescriptor; 2] {
    [
        ChannelDescriptor {
            id: ChannelId::Snapshot,
            priority: 5,
            send_queue_capacity: 10,
            recv_message_capacity: SNAPSHOT_MSG_SIZE,
        },
        ChannelDescriptor {
            id: ChannelId::Chunk,
            priority: 3,
            send_queue_capacity: 10,
            recv_message_capacity: CHUNK_MSG_SIZE,
        },
    ]
}
