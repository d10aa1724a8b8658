//! Logging facilities for SmartMatch.
//!
//! SmartMatch uses the `tracing` crate for instrumentation. Library code only
//! emits events; to see them, install a subscriber in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("smartmatch_net=debug")
//!         .init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! Bearer tokens are never included in log events.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Signal/slot system target.
    pub const SIGNAL: &str = "smartmatch_core::signal";
    /// Transport router target.
    pub const ROUTER: &str = "smartmatch_net::router";
    /// Request/response (HTTP) channel target.
    pub const HTTP: &str = "smartmatch_net::http";
    /// Streaming (WebSocket) channel target.
    pub const SUBSCRIPTION: &str = "smartmatch_net::subscription";
    /// Result cache target.
    pub const CACHE: &str = "smartmatch_net::cache";
    /// Watched query target.
    pub const WATCH: &str = "smartmatch_net::watch";
    /// Credential store target.
    pub const CREDENTIAL: &str = "smartmatch_net::credential";
    /// Configuration loading target.
    pub const CONFIG: &str = "smartmatch_net::config";
}
