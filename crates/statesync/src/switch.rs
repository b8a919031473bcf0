use statesync_primitives::PeerId;
use statesync_protocol::{ChannelId, Message};

/// Outbound side of the peer transport.
///
/// Implementations queue messages and return immediately; they are called
/// with no state sync locks held, but from async context, so they must not
/// block.
pub trait Switch: Send + Sync {
    /// Queues `message` to `peer` on the message's channel. Returns `false`
    /// if the peer is unknown or its send queue is full.
    fn send(&self, peer: &PeerId, message: Message) -> bool;

    fn broadcast(&self, message: Message);

    /// Disconnects `peer` after a protocol violation.
    fn stop_peer_for_error(&self, peer: &PeerId, reason: &str);
}

/// A decoded inbound message and where it came from.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub src: PeerId,
    pub channel: ChannelId,
    pub message: Message,
}

impl Envelope {
    /// Wraps `message` as if it arrived on its own channel.
    #[must_use]
    pub fn new(src: PeerId, message: Message) -> Self {
        Self {
            src,
            channel: message.channel(),
            message,
        }
    }
}
