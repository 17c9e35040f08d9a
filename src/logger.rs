use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{fmt as sub_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "Invalid log level '{}'. Use trace, debug, info, warn or error",
                other
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logger(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("idle_timeout_tester={}", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            sub_fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(true)
                .with_ansi(true)
                .compact(),
        )
        .init();
}

pub mod log {
    pub use tracing::{debug, error, info, warn};

    /// Record a connection lifecycle event
    pub fn connection(addr: &str, event: &str) {
        info!(peer = addr, event = event, "Connection");
    }

    /// Record the result of an upgrade handshake
    pub fn handshake(addr: &str, success: bool) {
        if success {
            debug!(peer = addr, "Handshake completed");
        } else {
            warn!(peer = addr, "Handshake failed");
        }
    }

    /// Record a test run state transition
    pub fn transition(from: &str, to: &str) {
        debug!(from = from, to = to, "Test run transition");
    }
}
