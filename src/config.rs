//! Configuration module
//!
//! This module handles CLI argument parsing with environment variable support
//! and builds the immutable settings shared by the server and the probe client.

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::logger::LogLevel;

/// Parse duration string (e.g., "60s", "2m", "1h") or plain seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

/// Default listen address of the echo server
pub const DEFAULT_LISTEN_ADDR: &str = "localhost:8080";

/// Default path of the echo endpoint
pub const DEFAULT_WS_PATH: &str = "/echo";

/// Default echo endpoint for the probe client
pub const DEFAULT_PROBE_URL: &str = "ws://localhost:8080/echo";

/// Default probe payload
pub const DEFAULT_PROBE_PAYLOAD: &str = "a";

/// CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Test whether idle TCP connections are silently dropped along the network path"
)]
#[command(rename_all = "snake_case")]
pub struct CliArgs {
    /// Log mode: trace, debug, info, warn, error (default: info)
    #[arg(long, global = true, env = "IDLE_TESTER_LOG_MODE", default_value = "info")]
    pub log_mode: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the echo server
    Serve(ServeArgs),
    /// Open a connection, keep it idle, then probe it
    Probe(ProbeArgs),
}

/// Arguments of the `serve` subcommand
#[derive(Args, Debug, Clone)]
#[command(rename_all = "snake_case")]
pub struct ServeArgs {
    /// HTTP service address
    #[arg(long, env = "IDLE_TESTER_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub addr: String,

    /// Path of the WebSocket echo endpoint
    #[arg(long, env = "IDLE_TESTER_WS_PATH", default_value = DEFAULT_WS_PATH)]
    pub ws_path: String,

    /// Largest accepted message in bytes (default: tungstenite's limits)
    #[arg(long, env = "IDLE_TESTER_MAX_MESSAGE_SIZE", help_heading = "Performance")]
    pub max_message_size: Option<usize>,

    /// Maximum concurrent channels, 0 = unlimited
    #[arg(long, env = "IDLE_TESTER_MAX_CHANNELS", default_value_t = 0, help_heading = "Performance")]
    pub max_channels: usize,

    /// TCP listen backlog for pending connections (default: 1024)
    #[arg(long, env = "IDLE_TESTER_TCP_BACKLOG", default_value_t = 1024, help_heading = "Performance")]
    pub tcp_backlog: i32,

    /// Enable TCP_NODELAY (default: true)
    #[arg(
        long,
        env = "IDLE_TESTER_TCP_NODELAY",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help_heading = "Performance"
    )]
    pub tcp_nodelay: bool,

    /// OS-level TCP keepalive interval. Disabled by default: keepalive probes
    /// refresh middlebox state and hide the drop being measured.
    #[arg(long, env = "IDLE_TESTER_TCP_KEEPALIVE", value_parser = parse_duration, help_heading = "Performance")]
    pub tcp_keepalive: Option<Duration>,
}

/// Idle durations offered by the reference UI. Each is the nominal number of
/// minutes plus 10 seconds, so a timeout at exactly the minute mark is caught.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPreset {
    #[value(name = "1m")]
    OneMinute,
    #[value(name = "5m")]
    FiveMinutes,
    #[value(name = "10m")]
    TenMinutes,
    #[value(name = "15m")]
    FifteenMinutes,
    #[value(name = "30m")]
    ThirtyMinutes,
    #[value(name = "60m")]
    SixtyMinutes,
}

impl DurationPreset {
    pub fn duration(self) -> Duration {
        let secs = match self {
            DurationPreset::OneMinute => 70,
            DurationPreset::FiveMinutes => 310,
            DurationPreset::TenMinutes => 610,
            DurationPreset::FifteenMinutes => 910,
            DurationPreset::ThirtyMinutes => 1810,
            DurationPreset::SixtyMinutes => 3610,
        };
        Duration::from_secs(secs)
    }
}

/// Arguments of the `probe` subcommand
#[derive(Args, Debug, Clone)]
#[command(rename_all = "snake_case")]
pub struct ProbeArgs {
    /// Echo endpoint URL
    #[arg(long, env = "IDLE_TESTER_URL", default_value = DEFAULT_PROBE_URL)]
    pub url: String,

    /// Idle duration (e.g., "90s", "5m", or plain seconds)
    #[arg(long, value_parser = parse_duration, conflicts_with = "preset", required_unless_present = "preset")]
    pub duration: Option<Duration>,

    /// Idle duration picked from the reference choices
    #[arg(long, value_enum)]
    pub preset: Option<DurationPreset>,

    /// Interval between progress reports (default: 1s)
    #[arg(long, env = "IDLE_TESTER_TICK", default_value = "1s", value_parser = parse_duration)]
    pub tick: Duration,

    /// Payload of the probe message
    #[arg(long, env = "IDLE_TESTER_PROBE_PAYLOAD", default_value = DEFAULT_PROBE_PAYLOAD)]
    pub probe_payload: String,

    /// How long to wait for the echo after probing, 0 = wait indefinitely
    #[arg(long, env = "IDLE_TESTER_ECHO_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub echo_timeout: Duration,

    /// Upgrade handshake timeout (default: 10s)
    #[arg(long, env = "IDLE_TESTER_CONNECT_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub connect_timeout: Duration,

    /// Largest accepted echo in bytes (default: tungstenite's limits)
    #[arg(long, env = "IDLE_TESTER_PROBE_MAX_MESSAGE_SIZE")]
    pub max_message_size: Option<usize>,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl ServeArgs {
    /// Validate the serve arguments
    pub fn validate(&self) -> Result<()> {
        if self.addr.is_empty() {
            return Err(anyhow!("Listen address is required (--addr)"));
        }
        validate_ws_path(&self.ws_path)?;
        validate_message_size(self.max_message_size)?;
        if let Some(keepalive) = self.tcp_keepalive {
            if keepalive.is_zero() {
                return Err(anyhow!("tcp_keepalive must be greater than 0"));
            }
        }
        Ok(())
    }
}

impl ProbeArgs {
    /// The idle duration requested, either explicitly or through a preset
    pub fn idle_duration(&self) -> Option<Duration> {
        self.duration.or_else(|| self.preset.map(DurationPreset::duration))
    }

    /// Validate the probe arguments
    pub fn validate(&self) -> Result<()> {
        // Built without TLS support, so only plain ws:// endpoints can be probed
        if !self.url.starts_with("ws://") {
            return Err(anyhow!("URL must use the ws:// scheme: {}", self.url));
        }
        match self.idle_duration() {
            None => return Err(anyhow!("An idle duration is required (--duration or --preset)")),
            Some(d) if d.is_zero() => return Err(anyhow!("Idle duration must be greater than 0")),
            Some(_) => {}
        }
        if self.tick.is_zero() {
            return Err(anyhow!("tick must be greater than 0"));
        }
        if self.probe_payload.is_empty() {
            return Err(anyhow!("probe_payload must not be empty"));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("connect_timeout must be greater than 0"));
        }
        validate_message_size(self.max_message_size)
    }
}

/// The echo path is mounted next to the home page at `/`, as a literal route
fn validate_ws_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(anyhow!("WebSocket path must start with '/': {}", path));
    }
    if path == "/" {
        return Err(anyhow!("WebSocket path must not be '/', it serves the home page"));
    }
    let literal = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'));
    if !literal || path.contains("//") {
        return Err(anyhow!("WebSocket path must be a plain path: {}", path));
    }
    Ok(())
}

fn validate_message_size(max_message_size: Option<usize>) -> Result<()> {
    if max_message_size == Some(0) {
        return Err(anyhow!("max_message_size must be greater than 0"));
    }
    Ok(())
}

/// Runtime server settings, built once at startup and shared read-only
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Address to bind (resolved at startup)
    pub addr: String,
    /// Path of the echo endpoint
    pub ws_path: String,
    /// Largest accepted message, `None` keeps tungstenite's limits
    pub max_message_size: Option<usize>,
    /// Maximum concurrent channels, 0 = unlimited
    pub max_channels: usize,
    /// TCP listen backlog
    pub tcp_backlog: i32,
    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
    /// OS keepalive interval, `None` leaves keepalive off
    pub tcp_keepalive: Option<Duration>,
}

impl ServerSettings {
    /// Create from CLI args
    pub fn from_cli(args: &ServeArgs) -> Self {
        Self {
            addr: args.addr.clone(),
            ws_path: args.ws_path.clone(),
            max_message_size: args.max_message_size,
            max_channels: args.max_channels,
            tcp_backlog: args.tcp_backlog,
            tcp_nodelay: args.tcp_nodelay,
            tcp_keepalive: args.tcp_keepalive,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_LISTEN_ADDR.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            max_message_size: None,
            max_channels: 0,
            tcp_backlog: 1024,
            tcp_nodelay: true,
            tcp_keepalive: None,
        }
    }
}

/// Runtime probe settings
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Echo endpoint URL
    pub url: String,
    /// Interval between progress reports
    pub tick: Duration,
    /// Payload of the probe message
    pub probe_payload: String,
    /// Bound on the wait for the echo, `None` waits indefinitely
    pub echo_timeout: Option<Duration>,
    /// Upgrade handshake timeout
    pub connect_timeout: Duration,
    /// Largest accepted echo, `None` keeps tungstenite's limits
    pub max_message_size: Option<usize>,
}

impl ProbeSettings {
    /// Create from CLI args
    pub fn from_cli(args: &ProbeArgs) -> Self {
        Self {
            url: args.url.clone(),
            tick: args.tick,
            probe_payload: args.probe_payload.clone(),
            echo_timeout: (!args.echo_timeout.is_zero()).then_some(args.echo_timeout),
            connect_timeout: args.connect_timeout,
            max_message_size: args.max_message_size,
        }
    }

    /// Client-side WebSocket config
    pub fn ws_config(&self) -> WebSocketConfig {
        ws_config_for(self.max_message_size)
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROBE_URL.to_string(),
            tick: Duration::from_secs(1),
            probe_payload: DEFAULT_PROBE_PAYLOAD.to_string(),
            echo_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
            max_message_size: None,
        }
    }
}

/// WebSocket config with an optional message cap. Buffer sizes stay at
/// tungstenite's defaults, which keep `max_write_buffer_size > write_buffer_size`.
pub fn ws_config_for(max_message_size: Option<usize>) -> WebSocketConfig {
    let config = WebSocketConfig::default();
    match max_message_size {
        Some(max) => config.max_message_size(Some(max)).max_frame_size(Some(max)),
        None => config,
    }
}
