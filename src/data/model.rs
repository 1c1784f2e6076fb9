use std::fmt;
use serde::{Deserialize, Serialize};

// Separator between exchange and symbol in cache keys and topic names.
pub const KEY_SEPARATOR: &str = "::";

// One polled instrument: an exchange identifier plus a trading symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketKey {
    pub exchange: String,
    pub symbol: String,
}

impl MarketKey {
    pub fn new(exchange: &str, symbol: &str) -> Self {
        Self {
            exchange: exchange.trim().to_lowercase(),
            symbol: symbol.trim().to_string(),
        }
    }

    // Cache key and broadcast topic share this form.
    pub fn topic(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.exchange, KEY_SEPARATOR, self.symbol)
    }
}

// Ticker as returned by an exchange client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTicker {
    pub symbol: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub timestamp: Option<i64>,
    pub info: serde_json::Value,
}

// `[ts, open, high, low, close, volume]`
pub type OhlcvRow = [f64; 6];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub timestamp: Option<i64>,
    pub info: Option<serde_json::Value>,
}

impl Ticker {
    // Responses echo the symbol as requested, not the venue's spelling.
    pub fn from_raw(raw: RawTicker, symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            bid: raw.bid,
            ask: raw.ask,
            last: raw.last,
            timestamp: raw.timestamp,
            info: match raw.info {
                serde_json::Value::Null => None,
                info => Some(info),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<OhlcvRow> for Ohlcv {
    fn from(row: OhlcvRow) -> Self {
        let [ts, open, high, low, close, volume] = row;
        Self {
            ts: ts as i64,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

// Payload pushed to subscribers after every successful refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub exchange: String,
    pub symbol: String,
    pub data: RawTicker,
}

impl TickerMessage {
    pub fn new(key: &MarketKey, data: RawTicker) -> Self {
        Self {
            kind: "ticker".to_string(),
            exchange: key.exchange.clone(),
            symbol: key.symbol.clone(),
            data,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
