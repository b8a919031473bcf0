//! State sync peer protocol.
//!
//! Four messages over two channels:
//!
//! | Message             | Channel    |
//! |---------------------|------------|
//! | `SnapshotsRequest`  | `Snapshot` |
//! | `SnapshotsResponse` | `Snapshot` |
//! | `ChunkRequest`      | `Chunk`    |
//! | `ChunkResponse`     | `Chunk`    |
//!
//! Every inbound message must pass [`Message::validate`] for the channel it
//! arrived on; a failure is a protocol violation by the sender.

pub mod channel;
pub mod error;
pub mod message;

pub use channel::{channel_descriptors, ChannelDescriptor, ChannelId};
pub use error::ValidationError;
pub use message::{ChunkRequest, ChunkResponse, Message, SnapshotsResponse};
