use std::sync::Arc;
use std::time::Duration;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::data::{Broadcaster, MarketKey, RawTicker, TickerCache, TickerMessage};
use crate::exchange::ExchangeClient;

// Periodic fetch -> cache -> publish cycle for one key.
pub struct RefreshLoop {
    pub key: MarketKey,
    pub client: Box<dyn ExchangeClient>,
    pub cache: Arc<TickerCache>,
    pub broadcaster: Arc<Broadcaster>,
    pub interval: Duration,
    pub close_timeout: Duration,
    pub cancel: CancellationToken,
}

impl RefreshLoop {
    pub async fn run(self) {
        let topic = self.key.topic();
        info!("Starting refresh loop for {} (every {:?})", topic, self.interval);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // A fetch in flight is abandoned on cancellation rather than awaited.
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.client.fetch_ticker(&self.key.symbol) => result,
            };

            match result {
                Ok(ticker) => self.deliver(&topic, ticker),
                Err(e) if e.is_input_error() => {
                    error!("Refresh rejected for {}: {}", topic, e);
                }
                Err(e) => {
                    warn!("Refresh failed for {}: {}", topic, e);
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.teardown(&topic).await;
        info!("Stopped refresh loop for {}", topic);
    }

    fn deliver(&self, topic: &str, ticker: RawTicker) {
        let message = TickerMessage::new(&self.key, ticker.clone());
        if let Some(evicted) = self.cache.put(topic, ticker) {
            debug!("Cache full, evicted {} for {}", evicted, topic);
        }

        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize ticker message for {}: {}", topic, e);
                return;
            }
        };

        let report = self.broadcaster.publish(topic, &json);
        if report.delivered > 0 {
            debug!("Broadcasted {} ticker to {} subscribers", topic, report.delivered);
        }
        if !report.lagging.is_empty() {
            warn!("{} subscribers of {} are lagging, message skipped for them", report.lagging.len(), topic);
        }
        for id in &report.pruned {
            info!("Removed closed subscriber {} from {}", id, topic);
        }
    }

    async fn teardown(&self, topic: &str) {
        match tokio::time::timeout(self.close_timeout, self.client.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Error closing exchange client for {}: {}", topic, e),
            Err(_) => warn!("Timed out closing exchange client for {}", topic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::sync::atomic::Ordering;
    use crate::data::SubscriberHandle;
    use crate::exchange::mock::{mock_registry, MockBehavior, MOCK_EXCHANGE};

    struct Harness {
        behavior: Arc<MockBehavior>,
        cache: Arc<TickerCache>,
        broadcaster: Arc<Broadcaster>,
        cancel: CancellationToken,
        key: MarketKey,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                behavior: MockBehavior::new(),
                cache: Arc::new(TickerCache::new(NonZeroUsize::new(16).unwrap(), Duration::from_secs(60))),
                broadcaster: Arc::new(Broadcaster::new()),
                cancel: CancellationToken::new(),
                key: MarketKey::new(MOCK_EXCHANGE, "BTCUSDT"),
            }
        }

        fn spawn(&self) -> tokio::task::JoinHandle<()> {
            let client = mock_registry(self.behavior.clone()).create(MOCK_EXCHANGE).unwrap();
            let refresh = RefreshLoop {
                key: self.key.clone(),
                client,
                cache: self.cache.clone(),
                broadcaster: self.broadcaster.clone(),
                interval: Duration::from_secs(5),
                close_timeout: Duration::from_secs(1),
                cancel: self.cancel.clone(),
            };
            tokio::spawn(refresh.run())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_populates_cache_and_publishes() {
        let harness = Harness::new();
        let (handle, mut rx) = SubscriberHandle::channel(8);
        harness.broadcaster.subscribe(&harness.key.topic(), handle);

        let task = harness.spawn();
        let message = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();

        assert_eq!(value["type"], "ticker");
        assert_eq!(value["exchange"], MOCK_EXCHANGE);
        assert_eq!(value["data"]["last"], 100.0);
        assert_eq!(harness.cache.get(&harness.key.topic()).unwrap().last, Some(100.0));

        harness.cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_arrive_in_order() {
        let harness = Harness::new();
        let (handle, mut rx) = SubscriberHandle::channel(8);
        harness.broadcaster.subscribe(&harness.key.topic(), handle);
        let task = harness.spawn();

        let mut seen = Vec::new();
        for price in [1.0, 2.0, 3.0] {
            harness.behavior.set_last(price);
            // Lands mid-sleep, so the next fetch sees the new price.
            let message = rx.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&message).unwrap();
            seen.push(value["data"]["last"].as_f64().unwrap());
        }

        assert_eq!(seen, vec![1.0, 2.0, 3.0]);
        harness.cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_last_value_and_loop_alive() {
        let harness = Harness::new();
        let task = harness.spawn();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.behavior.fetch_count(), 1);
        let cached = harness.cache.get(&harness.key.topic());

        harness.behavior.set_failing(true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(harness.behavior.fetch_count() >= 3);
        assert_eq!(harness.cache.get(&harness.key.topic()), cached);
        assert!(!task.is_finished());

        harness.behavior.set_last(250.0);
        harness.behavior.set_failing(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(harness.cache.get(&harness.key.topic()).unwrap().last, Some(250.0));

        harness.cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_successful_leaves_cache_empty() {
        let harness = Harness::new();
        harness.behavior.set_failing(true);
        let task = harness.spawn();

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(harness.cache.get(&harness.key.topic()).is_none());

        harness.cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_closes_client() {
        let harness = Harness::new();
        let task = harness.spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;

        harness.cancel.cancel();
        task.await.unwrap();

        assert_eq!(harness.behavior.close_count(), 1);
        assert_eq!(harness.behavior.fetch_count(), 1, "sleep should be interrupted, not completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_error_still_stops() {
        let harness = Harness::new();
        harness.behavior.fail_close.store(true, Ordering::SeqCst);
        let task = harness.spawn();

        harness.cancel.cancel();
        task.await.unwrap();
        assert_eq!(harness.behavior.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_close_is_bounded() {
        let harness = Harness::new();
        harness.behavior.hang_close.store(true, Ordering::SeqCst);
        let task = harness.spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cancelled_at = tokio::time::Instant::now();
        harness.cancel.cancel();
        let finished = tokio::time::timeout(Duration::from_secs(2), task).await;

        assert!(finished.is_ok(), "loop outlived its close timeout");
        assert!(cancelled_at.elapsed() >= Duration::from_secs(1));
        assert_eq!(harness.behavior.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_subscriber_pruned_by_loop() {
        let harness = Harness::new();
        let (kept, mut kept_rx) = SubscriberHandle::channel(8);
        let (gone, gone_rx) = SubscriberHandle::channel(8);
        let topic = harness.key.topic();
        harness.broadcaster.subscribe(&topic, kept);
        harness.broadcaster.subscribe(&topic, gone);
        drop(gone_rx);

        let task = harness.spawn();
        kept_rx.recv().await.unwrap();
        assert_eq!(harness.broadcaster.subscriber_count(&topic), 1);

        kept_rx.recv().await.unwrap();
        harness.cancel.cancel();
        task.await.unwrap();
    }
}
