use std::env;
use std::num::NonZeroUsize;
use std::time::Duration;
use log::{info, warn};

use crate::error::ConfigError;

// Server Configuration
pub const DEFAULT_API_BIND_ADDRESS: &str = "127.0.0.1:8000";
pub const DEFAULT_WS_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const STATS_INTERVAL_SECS: u64 = 60;

// Polling Configuration
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_EXCHANGE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

// Cache Configuration
pub const DEFAULT_CACHE_TTL_SECS: u64 = 10;
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024;

// Broadcast Configuration
pub const SUBSCRIBER_CHANNEL_SIZE: usize = 100;

// CoinMarketCap Configuration
pub const DEFAULT_CMC_BASE_URL: &str = "https://pro-api.coinmarketcap.com";
pub const CMC_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_bind_address: String,
    pub ws_bind_address: String,
    pub poll_interval_secs: u64,
    pub exchange_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub max_cache_size: u64,
    pub shutdown_timeout_secs: u64,
    pub cmc_api_key: Option<String>,
    pub cmc_base_url: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|name| env::var(name).ok())
    }

    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(name) {
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    name,
                    value: raw,
                }),
                None => Ok(default),
            }
        };

        Ok(Self {
            api_bind_address: lookup("API_BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_API_BIND_ADDRESS.to_string()),
            ws_bind_address: lookup("WS_BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_WS_BIND_ADDRESS.to_string()),
            poll_interval_secs: number("POLL_INTERVAL_SECONDS", DEFAULT_POLL_INTERVAL_SECS)?,
            exchange_timeout_secs: number("EXCHANGE_TIMEOUT_SECONDS", DEFAULT_EXCHANGE_TIMEOUT_SECS)?,
            cache_ttl_secs: number("CACHE_TTL_SECONDS", DEFAULT_CACHE_TTL_SECS)?,
            max_cache_size: number("MAX_CACHE_SIZE", DEFAULT_MAX_CACHE_SIZE)?,
            shutdown_timeout_secs: number("SHUTDOWN_TIMEOUT_SECONDS", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?,
            cmc_api_key: lookup("COINMARKETCAP_API_KEY").filter(|key| !key.trim().is_empty()),
            cmc_base_url: lookup("COINMARKETCAP_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CMC_BASE_URL.to_string()),
            log_level: lookup("RUST_LOG")
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("POLL_INTERVAL_SECONDS", self.poll_interval_secs),
            ("EXCHANGE_TIMEOUT_SECONDS", self.exchange_timeout_secs),
            ("CACHE_TTL_SECONDS", self.cache_ttl_secs),
            ("MAX_CACHE_SIZE", self.max_cache_size),
            ("SHUTDOWN_TIMEOUT_SECONDS", self.shutdown_timeout_secs),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive(name));
            }
        }

        if usize::try_from(self.max_cache_size).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "MAX_CACHE_SIZE",
                value: self.max_cache_size.to_string(),
            });
        }

        if self.cmc_api_key.is_none() {
            warn!("COINMARKETCAP_API_KEY not set, /cmc/quotes will answer 400");
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn cache_capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        usize::try_from(self.max_cache_size)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or(ConfigError::NotPositive("MAX_CACHE_SIZE"))
    }

    pub fn log_config(&self) {
        info!("Server Configuration:");
        info!("  API Bind Address: {}", self.api_bind_address);
        info!("  WebSocket Bind Address: {}", self.ws_bind_address);
        info!("  Poll Interval: {}s", self.poll_interval_secs);
        info!("  Exchange Timeout: {}s", self.exchange_timeout_secs);
        info!("  Cache: ttl {}s, max {} entries", self.cache_ttl_secs, self.max_cache_size);
        info!("  Log Level: {}", self.log_level);
        match &self.cmc_api_key {
            Some(key) => info!("  CMC API Key: {}***", key.chars().take(4).collect::<String>()),
            None => info!("  CMC API Key: <unset>"),
        }
    }
}
