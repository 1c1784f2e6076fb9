// Market data relay: polled exchange tickers served over HTTP and pushed to
// WebSocket subscribers from a shared expiring cache.

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod exchange;
pub mod websocket;
