//! Probe client
//!
//! - `connector`: opens the channel for a run
//! - `controller`: the idle-then-probe state machine
//! - `observer`: notification hooks for the presentation side
//! - `progress`: remaining-time and percentage formatting

mod connector;
mod controller;
mod observer;
mod progress;

pub use connector::{Connector, WsConnector};
pub use controller::{IdleTestController, Outcome, TestReport, TestRun, TestState};
pub use observer::{LogObserver, TestObserver};
pub use progress::{format_remaining, percent_complete, Progress};
