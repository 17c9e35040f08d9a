//! Idle connection timeout tester
//!
//! Architecture:
//! - `server`: WebSocket echo endpoint (acceptor, echo loop, accept loop)
//! - `client`: idle-then-probe test controller and its seams
//! - `transport`: the channel abstraction shared by both sides
//! - `config`, `error`, `logger`: ambient plumbing

pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod server;
pub mod transport;

pub use error::{Result, TesterError};
