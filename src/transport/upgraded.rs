//! Upgraded HTTP channel
//!
//! Server side of the echo endpoint: the socket axum hands over after a
//! successful `WebSocketUpgrade`. Messages are converted to and from the
//! tungstenite `Message` used by the rest of the crate.

use async_trait::async_trait;
use axum::extract::ws;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use super::{Channel, Message};
use crate::error::{Result, TesterError};

/// Channel over an upgraded axum WebSocket
pub struct UpgradedChannel {
    socket: ws::WebSocket,
    open: bool,
    released: bool,
}

impl UpgradedChannel {
    pub fn new(socket: ws::WebSocket) -> Self {
        Self {
            socket,
            open: true,
            released: false,
        }
    }
}

/// Convert an outgoing message. Raw frames have no axum counterpart.
fn into_axum(message: Message) -> Option<ws::Message> {
    let message = match message {
        Message::Text(text) => ws::Message::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => ws::Message::Binary(data),
        Message::Ping(data) => ws::Message::Ping(data),
        Message::Pong(data) => ws::Message::Pong(data),
        Message::Close(frame) => ws::Message::Close(frame.map(|frame| ws::CloseFrame {
            code: frame.code.into(),
            reason: frame.reason.as_str().to_owned().into(),
        })),
        Message::Frame(_) => return None,
    };
    Some(message)
}

fn from_axum(message: ws::Message) -> Message {
    match message {
        ws::Message::Text(text) => Message::text(text.as_str().to_owned()),
        ws::Message::Binary(data) => Message::Binary(data),
        ws::Message::Ping(data) => Message::Ping(data),
        ws::Message::Pong(data) => Message::Pong(data),
        ws::Message::Close(frame) => Message::Close(frame.map(|frame| CloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.as_str().to_owned().into(),
        })),
    }
}

#[async_trait]
impl Channel for UpgradedChannel {
    async fn send(&mut self, message: Message) -> Result<()> {
        if !self.open {
            return Err(TesterError::ChannelClosed);
        }
        let message = into_axum(message)
            .ok_or_else(|| TesterError::Channel("raw frames cannot be sent".to_string()))?;
        if let Err(e) = self.socket.send(message).await {
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
            match self.socket.recv().await {
                Some(Ok(message @ (ws::Message::Text(_) | ws::Message::Binary(_)))) => {
                    return Ok(from_axum(message));
                }
                Some(Ok(ws::Message::Close(_))) | None => {
                    self.open = false;
                    return Err(TesterError::ChannelClosed);
                }
                // Pings are answered by the underlying tungstenite stream
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
        let _ = self.socket.send(ws::Message::Close(None)).await;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_messages_convert_unchanged() {
        let messages = vec![
            Message::text("a"),
            Message::text("ünïcödé"),
            Message::binary(vec![0u8, 255, 10, 13]),
            Message::binary(Vec::<u8>::new()),
        ];
        for message in messages {
            let converted = into_axum(message.clone()).unwrap();
            assert_eq!(from_axum(converted), message);
        }
    }

    #[test]
    fn test_close_frame_keeps_code_and_reason() {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "bye".into(),
        }));
        match into_axum(close) {
            Some(ws::Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected conversion: {:?}", other),
        }
    }

    #[test]
    fn test_text_and_binary_stay_distinct() {
        let text = into_axum(Message::text("61")).unwrap();
        let binary = into_axum(Message::binary(b"61".to_vec())).unwrap();
        assert!(matches!(text, ws::Message::Text(_)));
        assert!(matches!(binary, ws::Message::Binary(_)));
    }
}
