//! WebSocket channel
//!
//! Wraps a `tokio_tungstenite::WebSocketStream`. Uses a generic type parameter to
//! work with any AsyncRead + AsyncWrite stream: `MaybeTlsStream` for the probe
//! client, in-memory duplex streams in tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

use super::Channel;
use crate::error::{Result, TesterError};

/// WebSocket-backed channel
pub struct WsChannel<S> {
    ws_stream: WebSocketStream<S>,
    open: bool,
    released: bool,
}

impl<S> WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a channel from an upgraded WebSocket stream
    pub fn new(ws_stream: WebSocketStream<S>) -> Self {
        Self {
            ws_stream,
            open: true,
            released: false,
        }
    }
}

#[async_trait]
impl<S> Channel for WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: Message) -> Result<()> {
        if !self.open {
            return Err(TesterError::ChannelClosed);
        }
        if let Err(e) = self.ws_stream.send(message).await {
            self.open = false;
            return Err(TesterError::Channel(format!("WebSocket send error: {}", e)));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message> {
        if !self.open {
            return Err(TesterError::ChannelClosed);
        }

        loop {
            match self.ws_stream.next().await {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    return Ok(message);
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.open = false;
                    return Err(TesterError::ChannelClosed);
                }
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.open = false;
                    return Err(TesterError::Channel(format!("WebSocket read error: {}", e)));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.released {
            return;
        }
        self.open = false;
        self.released = true;
        // Also flushes the reply to a close frame received from the peer
        let _ = self.ws_stream.close(None).await;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn ws_pair() -> (
        WsChannel<tokio::io::DuplexStream>,
        WsChannel<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (WsChannel::new(server), WsChannel::new(client))
    }

    #[tokio::test]
    async fn test_send_and_recv_preserves_type() {
        let (mut server, mut client) = ws_pair().await;

        client.send(Message::text("hello")).await.unwrap();
        client.send(Message::binary(vec![0u8, 159, 146, 150])).await.unwrap();

        assert_eq!(server.recv().await.unwrap(), Message::text("hello"));
        assert_eq!(
            server.recv().await.unwrap(),
            Message::binary(vec![0u8, 159, 146, 150])
        );
    }

    #[tokio::test]
    async fn test_ping_is_not_surfaced() {
        let (mut server, mut client) = ws_pair().await;

        client
            .ws_stream
            .send(Message::Ping(vec![1u8].into()))
            .await
            .unwrap();
        client.send(Message::text("after ping")).await.unwrap();

        assert_eq!(server.recv().await.unwrap(), Message::text("after ping"));
    }

    #[tokio::test]
    async fn test_peer_close_reports_channel_closed() {
        let (mut server, mut client) = ws_pair().await;

        client.close().await;
        assert!(!client.is_open());

        let err = server.recv().await.unwrap_err();
        assert!(matches!(err, TesterError::ChannelClosed));
        assert!(!server.is_open());

        // Closed channels refuse further traffic
        assert!(server.send(Message::text("late")).await.is_err());
    }
}
