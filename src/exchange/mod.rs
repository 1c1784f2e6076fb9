pub mod binance;
pub mod bybit;
pub mod client;
pub mod error;
pub mod http;
pub mod registry;

#[cfg(test)]
pub mod mock;

pub use client::ExchangeClient;
pub use error::{ExchangeError, ExchangeResult};
pub use registry::{ClientOptions, ExchangeRegistry};
