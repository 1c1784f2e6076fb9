use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::binance::BinanceClient;
use super::bybit::BybitClient;
use super::client::ExchangeClient;
use super::error::{ExchangeError, ExchangeResult};

// Settings shared by every client the registry builds.
#[derive(Clone)]
pub struct ClientOptions {
    pub http: reqwest::Client,
    pub timeout: Duration,
}

impl ClientOptions {
    pub fn new(timeout: Duration) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, timeout })
    }
}

pub type ClientFactory = Arc<dyn Fn(&ClientOptions) -> Box<dyn ExchangeClient> + Send + Sync>;

// Known exchange identifiers and how to construct a client for each.
pub struct ExchangeRegistry {
    factories: BTreeMap<String, ClientFactory>,
    options: ClientOptions,
}

impl ExchangeRegistry {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            factories: BTreeMap::new(),
            options,
        }
    }

    // Registry with the built-in REST clients.
    pub fn with_defaults(options: ClientOptions) -> Self {
        let mut registry = Self::new(options);
        registry.register("binance", |options| Box::new(BinanceClient::new(options.http.clone())));
        registry.register("bybit", |options| Box::new(BybitClient::new(options.http.clone())));
        registry
    }

    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&ClientOptions) -> Box<dyn ExchangeClient> + Send + Sync + 'static,
    {
        self.factories.insert(id.to_lowercase(), Arc::new(factory));
    }

    pub fn supports(&self, id: &str) -> bool {
        self.factories.contains_key(&id.to_lowercase())
    }

    // Builds a fresh client, failing fast on unknown identifiers.
    pub fn create(&self, id: &str) -> ExchangeResult<Box<dyn ExchangeClient>> {
        let id = id.to_lowercase();
        let factory = self
            .factories
            .get(&id)
            .ok_or(ExchangeError::Unsupported(id))?;
        Ok(factory(&self.options))
    }

    pub fn exchanges(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    // Upper bound for a client's teardown.
    pub fn close_timeout(&self) -> Duration {
        self.options.timeout
    }
}
