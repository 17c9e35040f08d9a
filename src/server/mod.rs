//! Echo server
//!
//! - `acceptor`: HTTP routing, the upgrade handshake and the channel limit
//! - `echo`: the per-channel echo loop
//! - `runner`: listener setup and serving until shutdown

pub mod acceptor;
mod echo;
mod runner;

pub use acceptor::{build_router, AcceptorState};
pub use echo::{run_echo_loop, EchoSummary};
pub use runner::{bind_listener, run_server, serve};
