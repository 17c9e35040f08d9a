//! In-process channel pair
//!
//! Both ends live in the same process and are connected by unbounded queues.
//! Dropping or closing one end is observed by the other as `ChannelClosed`.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::Channel;
use crate::error::{Result, TesterError};

/// One end of an in-memory channel pair
pub struct MemoryChannel {
    tx: Option<mpsc::UnboundedSender<Message>>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl MemoryChannel {
    /// Create two connected ends
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MemoryChannel {
                tx: Some(a_tx),
                rx: a_rx,
            },
            MemoryChannel {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&mut self, message: Message) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TesterError::ChannelClosed)?;
        if tx.send(message).is_err() {
            self.tx = None;
            return Err(TesterError::ChannelClosed);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message> {
        if self.tx.is_none() {
            return Err(TesterError::ChannelClosed);
        }
        match self.rx.recv().await {
            Some(message) => Ok(message),
            None => {
                self.tx = None;
                Err(TesterError::ChannelClosed)
            }
        }
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }

    fn is_open(&self) -> bool {
        self.tx.is_some()
    }
}
