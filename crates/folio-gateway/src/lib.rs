//! HTTP surface of the Folio portfolio assistant.

/// Per-client token buckets.
pub mod rate_limit;
/// Request handlers.
pub mod routes;
/// Router assembly and shared state.
pub mod server;

pub use rate_limit::RateLimiter;
pub use server::{AppState, GatewayConfig, GatewayServer};
