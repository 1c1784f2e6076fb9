use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::data::{OhlcvRow, RawTicker};
use super::client::{venue_symbol, ExchangeClient};
use super::error::{ExchangeError, ExchangeResult};
use super::http::{get_json, number, required_number};

pub const BINANCE_BASE_URL: &str = "https://api.binance.com";

const TIMEFRAMES: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];
const MAX_KLINES: u32 = 1000;

pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    closed: AtomicBool,
}

impl BinanceClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, BINANCE_BASE_URL)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> ExchangeResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExchangeError::Closed);
        }
        Ok(())
    }
}

// -1121 is "Invalid symbol."
fn is_bad_symbol(body: &Value) -> bool {
    body.get("code").and_then(Value::as_i64) == Some(-1121)
}

pub fn parse_ticker(value: Value) -> ExchangeResult<RawTicker> {
    let symbol = value
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| ExchangeError::Decode("ticker without symbol".to_string()))?
        .to_string();

    Ok(RawTicker {
        symbol,
        bid: value.get("bidPrice").and_then(number),
        ask: value.get("askPrice").and_then(number),
        last: value.get("lastPrice").and_then(number),
        timestamp: value.get("closeTime").and_then(Value::as_i64),
        info: value,
    })
}

pub fn parse_klines(value: &Value) -> ExchangeResult<Vec<OhlcvRow>> {
    let rows = value
        .as_array()
        .ok_or_else(|| ExchangeError::Decode("klines response is not an array".to_string()))?;

    rows.iter()
        .map(|row| -> ExchangeResult<OhlcvRow> {
            let cell = |i: usize, name: &str| {
                row.get(i)
                    .ok_or_else(|| ExchangeError::Decode(format!("kline missing {}", name)))
                    .and_then(|v| required_number(v, name))
            };
            Ok([
                cell(0, "open time")?,
                cell(1, "open")?,
                cell(2, "high")?,
                cell(3, "low")?,
                cell(4, "close")?,
                cell(5, "volume")?,
            ])
        })
        .collect()
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn id(&self) -> &str {
        "binance"
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<RawTicker> {
        self.ensure_open()?;
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let query = [("symbol", venue_symbol(symbol))];
        let body = get_json(&self.http, &url, &query, symbol, is_bad_symbol).await?;
        parse_ticker(body)
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<OhlcvRow>> {
        self.ensure_open()?;
        if !TIMEFRAMES.contains(&timeframe) {
            return Err(ExchangeError::InvalidParameter(format!("unsupported timeframe {}", timeframe)));
        }

        let url = format!("{}/api/v3/klines", self.base_url);
        let mut query = vec![
            ("symbol", venue_symbol(symbol)),
            ("interval", timeframe.to_string()),
        ];
        if let Some(since) = since {
            query.push(("startTime", since.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.min(MAX_KLINES).to_string()));
        }

        let body = get_json(&self.http, &url, &query, symbol, is_bad_symbol).await?;
        parse_klines(&body)
    }

    async fn close(&self) -> ExchangeResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closed binance client");
        }
        Ok(())
    }
}
