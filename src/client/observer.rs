//! Observer hooks
//!
//! The presentation side of a test run. Observers only render notifications;
//! they own no protocol logic.

use crate::logger::log;

/// Receives notifications from a running test
pub trait TestObserver: Send + Sync {
    /// Periodic progress while idling
    fn on_progress(&self, remaining_label: &str, percent: f64);
    /// The probe was echoed back
    fn on_success(&self);
    /// The run failed (handshake rejected, or the channel was dropped)
    fn on_failure(&self, detail: &str);
    /// The run was cancelled by the operator
    fn on_cancelled(&self) {}
}

/// Observer that renders through the tracing subscriber
#[derive(Debug, Default)]
pub struct LogObserver;

impl TestObserver for LogObserver {
    fn on_progress(&self, remaining_label: &str, percent: f64) {
        log::info!(
            time_left = remaining_label,
            progress = format_args!("{:.0}%", percent),
            "Idling, please wait..."
        );
    }

    fn on_success(&self) {
        log::info!("Good news! Idling connection was not timed out.");
    }

    fn on_failure(&self, detail: &str) {
        log::warn!(
            error = detail,
            "Sorry! Idling connection was timed out. Try a smaller duration."
        );
    }

    fn on_cancelled(&self) {
        log::info!("Test cancelled");
    }
}
