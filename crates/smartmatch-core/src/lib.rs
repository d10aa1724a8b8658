//! Core primitives for the SmartMatch marketplace client.
//!
//! This crate provides the pieces shared by the rest of the workspace:
//!
//! - **Signals**: a small observer primitive used to deliver watched query
//!   results to the UI layer ([`Signal`], [`ConnectionGuard`])
//! - **Logging**: the `tracing` target names used by every crate
//!   ([`logging::targets`])

pub mod logging;
pub mod signal;

pub use signal::{ConnectionGuard, ConnectionId, Signal};
