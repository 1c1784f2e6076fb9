use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::data::{OhlcvRow, RawTicker};
use super::client::{venue_symbol, ExchangeClient};
use super::error::{ExchangeError, ExchangeResult};
use super::http::{get_json, number, required_number};

pub const BYBIT_BASE_URL: &str = "https://api.bybit.com";

const CATEGORY: &str = "spot";
const MAX_KLINES: u32 = 1000;

// retCode values documented for v5 market endpoints
const RET_OK: i64 = 0;
const RET_PARAMS_ERROR: i64 = 10001;
const RET_TOO_MANY_VISITS: i64 = 10006;

pub struct BybitClient {
    http: reqwest::Client,
    base_url: String,
    closed: AtomicBool,
}

// Unified timeframe -> Bybit kline interval.
fn interval(timeframe: &str) -> Option<&'static str> {
    Some(match timeframe {
        "1m" => "1",
        "3m" => "3",
        "5m" => "5",
        "15m" => "15",
        "30m" => "30",
        "1h" => "60",
        "2h" => "120",
        "4h" => "240",
        "6h" => "360",
        "12h" => "720",
        "1d" => "D",
        "1w" => "W",
        "1M" => "M",
        _ => return None,
    })
}

impl BybitClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, BYBIT_BASE_URL)
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

fn is_bad_symbol(body: &Value) -> bool {
    body.get("retCode").and_then(Value::as_i64) == Some(RET_PARAMS_ERROR)
}

// Bybit answers 200 with a non-zero `retCode` on most failures.
fn unwrap_result(body: Value, symbol: &str) -> ExchangeResult<Value> {
    match body.get("retCode").and_then(Value::as_i64) {
        Some(RET_OK) => Ok(body),
        Some(RET_PARAMS_ERROR) => Err(ExchangeError::BadSymbol(symbol.to_string())),
        Some(RET_TOO_MANY_VISITS) => Err(ExchangeError::RateLimited),
        Some(code) => Err(ExchangeError::Upstream {
            status: 200,
            message: format!(
                "retCode {}: {}",
                code,
                body.get("retMsg").and_then(Value::as_str).unwrap_or_default()
            ),
        }),
        None => Err(ExchangeError::Decode("response without retCode".to_string())),
    }
}

pub fn parse_ticker(body: Value, symbol: &str) -> ExchangeResult<RawTicker> {
    let body = unwrap_result(body, symbol)?;
    let timestamp = body.get("time").and_then(Value::as_i64);
    let entry = body
        .pointer("/result/list/0")
        .cloned()
        .ok_or_else(|| ExchangeError::BadSymbol(symbol.to_string()))?;

    Ok(RawTicker {
        symbol: entry
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or(symbol)
            .to_string(),
        bid: entry.get("bid1Price").and_then(number),
        ask: entry.get("ask1Price").and_then(number),
        last: entry.get("lastPrice").and_then(number),
        timestamp,
        info: entry,
    })
}

// Bybit lists candles newest first; rows come back oldest first.
pub fn parse_klines(body: Value, symbol: &str) -> ExchangeResult<Vec<OhlcvRow>> {
    let body = unwrap_result(body, symbol)?;
    let rows = body
        .pointer("/result/list")
        .and_then(Value::as_array)
        .ok_or_else(|| ExchangeError::Decode("kline response without list".to_string()))?;

    let mut parsed = rows
        .iter()
        .map(|row| -> ExchangeResult<OhlcvRow> {
            let cell = |i: usize, name: &str| {
                row.get(i)
                    .ok_or_else(|| ExchangeError::Decode(format!("kline missing {}", name)))
                    .and_then(|v| required_number(v, name))
            };
            Ok([
                cell(0, "start time")?,
                cell(1, "open")?,
                cell(2, "high")?,
                cell(3, "low")?,
                cell(4, "close")?,
                cell(5, "volume")?,
            ])
        })
        .collect::<ExchangeResult<Vec<OhlcvRow>>>()?;
    parsed.reverse();
    Ok(parsed)
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn id(&self) -> &str {
        "bybit"
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<RawTicker> {
        self.ensure_open()?;
        let url = format!("{}/v5/market/tickers", self.base_url);
        let query = [
            ("category", CATEGORY.to_string()),
            ("symbol", venue_symbol(symbol)),
        ];
        let body = get_json(&self.http, &url, &query, symbol, is_bad_symbol).await?;
        parse_ticker(body, symbol)
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<OhlcvRow>> {
        self.ensure_open()?;
        let interval = interval(timeframe).ok_or_else(|| {
            ExchangeError::InvalidParameter(format!("unsupported timeframe {}", timeframe))
        })?;

        let url = format!("{}/v5/market/kline", self.base_url);
        let mut query = vec![
            ("category", CATEGORY.to_string()),
            ("symbol", venue_symbol(symbol)),
            ("interval", interval.to_string()),
        ];
        if let Some(since) = since {
            query.push(("start", since.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.min(MAX_KLINES).to_string()));
        }

        let body = get_json(&self.http, &url, &query, symbol, is_bad_symbol).await?;
        parse_klines(body, symbol)
    }

    async fn close(&self) -> ExchangeResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closed bybit client");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ticker() {
        let body = json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "spot",
                "list": [{
                    "symbol": "BTCUSDT",
                    "bid1Price": "64000.1",
                    "ask1Price": "64000.2",
                    "lastPrice": "64000.15"
                }]
            },
            "time": 1_700_000_000_123i64
        });

        let ticker = parse_ticker(body, "BTC/USDT").unwrap();
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.bid, Some(64000.1));
        assert_eq!(ticker.last, Some(64000.15));
        assert_eq!(ticker.timestamp, Some(1_700_000_000_123));
    }

    #[test]
    fn test_empty_list_is_bad_symbol() {
        let body = json!({"retCode": 0, "result": {"list": []}});
        assert!(matches!(parse_ticker(body, "NOPE"), Err(ExchangeError::BadSymbol(_))));
    }

    #[test]
    fn test_ret_codes() {
        let limited = json!({"retCode": 10006, "retMsg": "Too many visits"});
        assert!(matches!(parse_ticker(limited, "X"), Err(ExchangeError::RateLimited)));

        let other = json!({"retCode": 10016, "retMsg": "Server error"});
        match parse_ticker(other, "X") {
            Err(ExchangeError::Upstream { message, .. }) => assert!(message.contains("10016")),
            result => panic!("unexpected result: {:?}", result),
        }
    }

    #[test]
    fn test_parse_klines_oldest_first() {
        let body = json!({
            "retCode": 0,
            "result": {
                "list": [
                    ["1700000060000", "1.5", "1.7", "1.4", "1.6", "80", "128"],
                    ["1700000000000", "1.0", "2.0", "0.5", "1.5", "100", "150"]
                ]
            }
        });

        let rows = parse_klines(body, "BTCUSDT").unwrap();
        assert_eq!(rows[0][0], 1_700_000_000_000.0);
        assert_eq!(rows[1][4], 1.6);
    }

    #[test]
    fn test_interval_mapping() {
        assert_eq!(interval("1m"), Some("1"));
        assert_eq!(interval("1h"), Some("60"));
        assert_eq!(interval("1d"), Some("D"));
        assert_eq!(interval("8h"), None);
    }
}
