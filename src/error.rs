use std::io;
use thiserror::Error;

/// Unified error type for the tester
#[derive(Error, Debug)]
pub enum TesterError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected input, detected before any channel is opened
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upgrade handshake failed
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// I/O failure on an established channel
    #[error("Channel error: {0}")]
    Channel(String),

    /// Peer closed the channel, or it was closed locally
    #[error("Channel closed")]
    ChannelClosed,

    /// No reply to the probe within the configured bound
    #[error("No echo received within {0:?}")]
    EchoTimeout(std::time::Duration),

    /// Reply did not match the probe
    #[error("Echo mismatch: {0}")]
    EchoMismatch(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TesterError>;

impl TesterError {
    /// Whether the error happened while establishing the channel
    pub fn is_handshake(&self) -> bool {
        matches!(self, TesterError::Handshake(_))
    }

    /// Whether the error happened on an already established channel
    pub fn is_channel(&self) -> bool {
        matches!(
            self,
            TesterError::Channel(_)
                | TesterError::ChannelClosed
                | TesterError::EchoTimeout(_)
                | TesterError::EchoMismatch(_)
        )
    }
}
