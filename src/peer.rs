//! The Peer contract: the transport-layer collaborator this crate sends
//! encoded messages to and receives decoded messages from. Stream
//! framing, keepalive, and TLS/WebSocket transports are out of scope —
//! this module defines only the contract plus an in-memory
//! implementation for wiring dialogs together in-process and in tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::Result;

/// Sends encoded outbound messages. Inbound delivery is not part of this
/// trait: whatever real transport a deployment plugs in decodes messages
/// off the wire and hands each one to `Dialog::receive_message` (or
/// `InviteDialog::receive_message`), the single dispatch entry point
/// that sorts responses/ACKs from requests internally.
#[async_trait]
pub trait Peer: Send + Sync {
    async fn send_message(&self, msg: &Message) -> Result<()>;
}

/// An in-memory Peer backed by an mpsc channel, used by the test suite
/// and for wiring dialogs together without a real socket.
pub struct ChannelPeer {
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelPeer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Peer for ChannelPeer {
    async fn send_message(&self, msg: &Message) -> Result<()> {
        self.sender
            .send(msg.clone())
            .map_err(|_| crate::Error::ConnectionLost)
    }
}
