//! Channel connectors
//!
//! Opening a channel is a seam so the controller can be driven by any transport.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::MaybeTlsStream;

use crate::error::{Result, TesterError};
use crate::transport::{Channel, WsChannel};

/// Opens a fresh channel for one test run
#[async_trait]
pub trait Connector: Send + Sync {
    type Channel: Channel;

    /// Perform the upgrade handshake. Failures are `TesterError::Handshake`.
    async fn connect(&self) -> Result<Self::Channel>;
}

/// Connects to a WebSocket echo endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
    config: Option<WebSocketConfig>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            config: None,
        }
    }

    /// Use a custom WebSocket configuration
    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = Some(config);
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Channel = WsChannel<MaybeTlsStream<TcpStream>>;

    async fn connect(&self) -> Result<Self::Channel> {
        let handshake =
            tokio_tungstenite::connect_async_with_config(self.url.as_str(), self.config.clone(), true);

        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                TesterError::Handshake(format!("timed out after {:?}", self.connect_timeout))
            })?
            .map_err(|e| TesterError::Handshake(e.to_string()))?;

        Ok(WsChannel::new(ws_stream))
    }
}
