//! Tether Server - WebSocket endpoint for the remote-eval bridge.
//!
//! Exposed as a library so the endpoint can be embedded and integration
//! tested in-process; the `tether-server` binary is a thin CLI around
//! [`server::start_server`].

pub mod server;

pub use server::{start_server, AppState, ConnectionHook};
