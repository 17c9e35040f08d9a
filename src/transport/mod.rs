//! Channel abstraction
//!
//! A channel is a full-duplex message transport owned by exactly one side of a
//! test. Implementations:
//! - WebSocket (over any AsyncRead + AsyncWrite stream), used by the client
//! - Upgraded axum WebSocket, used by the echo server
//! - In-memory pair (both ends in one process)

mod memory;
mod upgraded;
mod ws;

pub use memory::MemoryChannel;
pub use upgraded::UpgradedChannel;
pub use ws::WsChannel;

pub use tokio_tungstenite::tungstenite::Message;

use crate::error::Result;
use async_trait::async_trait;

/// Full-duplex message channel
///
/// `recv` only yields data messages (text or binary). Control frames are
/// handled by the implementation. Once a channel reports closure or an I/O
/// error it stays closed.
#[async_trait]
pub trait Channel: Send {
    /// Send one message, flushing it to the peer
    async fn send(&mut self, message: Message) -> Result<()>;

    /// Wait for the next data message
    async fn recv(&mut self) -> Result<Message>;

    /// Close the channel. Calling it more than once is a no-op.
    async fn close(&mut self);

    /// Whether the channel can still carry messages
    fn is_open(&self) -> bool;
}

/// Short tag naming the message type, for logs
pub fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind() {
        assert_eq!(message_kind(&Message::text("a")), "text");
        assert_eq!(message_kind(&Message::binary(vec![1u8, 2])), "binary");
        assert_eq!(message_kind(&Message::Close(None)), "close");
    }
}
