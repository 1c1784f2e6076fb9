// Scriptable in-memory exchange used by tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::data::{OhlcvRow, RawTicker};
use super::client::ExchangeClient;
use super::error::{ExchangeError, ExchangeResult};
use super::registry::{ClientOptions, ExchangeRegistry};

pub const MOCK_EXCHANGE: &str = "mock";

// Shared knobs and counters for every client the mock factory builds.
pub struct MockBehavior {
    pub created: AtomicUsize,
    pub fetches: AtomicUsize,
    pub closes: AtomicUsize,
    pub failing: AtomicBool,
    pub panic_next: AtomicBool,
    pub fail_close: AtomicBool,
    // `close` never resolves while set.
    pub hang_close: AtomicBool,
    last_bits: AtomicU64,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            created: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            hang_close: AtomicBool::new(false),
            last_bits: AtomicU64::new(100.0f64.to_bits()),
        }
    }
}

impl MockBehavior {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_last(&self, last: f64) {
        self.last_bits.store(last.to_bits(), Ordering::SeqCst);
    }

    pub fn last(&self) -> f64 {
        f64::from_bits(self.last_bits.load(Ordering::SeqCst))
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MockClient {
    behavior: Arc<MockBehavior>,
}

#[async_trait]
impl ExchangeClient for MockClient {
    fn id(&self) -> &str {
        MOCK_EXCHANGE
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<RawTicker> {
        self.behavior.fetches.fetch_add(1, Ordering::SeqCst);
        if self.behavior.panic_next.swap(false, Ordering::SeqCst) {
            panic!("mock exchange fault");
        }
        if self.behavior.failing.load(Ordering::SeqCst) {
            return Err(ExchangeError::Upstream {
                status: 503,
                message: "maintenance".to_string(),
            });
        }

        let last = self.behavior.last();
        Ok(RawTicker {
            symbol: symbol.to_string(),
            bid: Some(last - 0.5),
            ask: Some(last + 0.5),
            last: Some(last),
            timestamp: Some(1_700_000_000_000),
            info: serde_json::json!({ "source": MOCK_EXCHANGE }),
        })
    }

    async fn fetch_ohlcv(
        &self,
        _symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<OhlcvRow>> {
        if timeframe != "1m" {
            return Err(ExchangeError::InvalidParameter(format!("unsupported timeframe {}", timeframe)));
        }
        if self.behavior.failing.load(Ordering::SeqCst) {
            return Err(ExchangeError::Timeout);
        }

        let start = since.unwrap_or(1_700_000_000_000) as f64;
        let rows = (0..limit.unwrap_or(100).min(5))
            .map(|i| {
                let ts = start + f64::from(i) * 60_000.0;
                [ts, 1.0, 2.0, 0.5, 1.5, 10.0]
            })
            .collect();
        Ok(rows)
    }

    async fn close(&self) -> ExchangeResult<()> {
        self.behavior.closes.fetch_add(1, Ordering::SeqCst);
        if self.behavior.hang_close.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.behavior.fail_close.load(Ordering::SeqCst) {
            return Err(ExchangeError::Decode("close failed".to_string()));
        }
        Ok(())
    }
}

// Registry that only knows the mock exchange.
pub fn mock_registry(behavior: Arc<MockBehavior>) -> ExchangeRegistry {
    let options = ClientOptions {
        http: reqwest::Client::new(),
        timeout: Duration::from_secs(1),
    };
    let mut registry = ExchangeRegistry::new(options);
    registry.register(MOCK_EXCHANGE, move |_| {
        behavior.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MockClient { behavior: behavior.clone() })
    });
    registry
}
