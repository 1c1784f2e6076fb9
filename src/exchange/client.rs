use async_trait::async_trait;

use crate::data::{OhlcvRow, RawTicker};
use super::error::ExchangeResult;

// Capability set every market-data venue exposes to the service.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<RawTicker>;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<OhlcvRow>>;

    // Releases held resources. Fetches after `close` fail with `Closed`.
    async fn close(&self) -> ExchangeResult<()>;
}

// `BTC/USDT`, `btc-usdt` and `BTCUSDT` all become `BTCUSDT`.
pub fn venue_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_' | ' '))
        .collect::<String>()
        .to_uppercase()
}
