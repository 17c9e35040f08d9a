//! Echo loop
//!
//! Reflects every data message back to the sender, unchanged, until the first
//! receive or send failure. The loop owns its channel and releases it on exit.

use crate::error::TesterError;
use crate::logger::log;
use crate::transport::{message_kind, Channel};

/// Summary of a finished echo loop
#[derive(Debug)]
pub struct EchoSummary {
    /// Number of messages reflected
    pub echoed: u64,
    /// The failure that ended the loop
    pub reason: TesterError,
}

/// Run the echo loop until the channel fails. Never retries.
pub async fn run_echo_loop<C: Channel>(mut channel: C, channel_id: u64) -> EchoSummary {
    let mut echoed = 0u64;

    let reason = loop {
        let message = match channel.recv().await {
            Ok(message) => message,
            Err(e) => {
                log::debug!(channel = channel_id, error = %e, "read");
                break e;
            }
        };

        log::debug!(
            channel = channel_id,
            kind = message_kind(&message),
            len = message.len(),
            "recv"
        );

        if let Err(e) = channel.send(message).await {
            log::debug!(channel = channel_id, error = %e, "write");
            break e;
        }
        echoed += 1;
    };

    channel.close().await;
    EchoSummary { echoed, reason }
}
