//! Tally query surface: the rate-limited HTTP API serving point reads over
//! persisted activity documents.

pub mod rate_limit;
pub mod routes;
pub mod server;

pub use rate_limit::RateLimiter;
pub use server::{start_server, GatewayState};
