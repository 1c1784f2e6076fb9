pub mod cache;
pub mod model;
pub mod pubsub;
pub mod refresh;
pub mod supervisor;

pub use cache::ExpiringCache;
pub use model::{MarketKey, Ohlcv, OhlcvRow, RawTicker, Ticker, TickerMessage};
pub use pubsub::{Broadcaster, PublishReport, SubscriberHandle, SubscriberId};
pub use supervisor::{PollState, PollerSupervisor};

// Latest ticker per `exchange::symbol`.
pub type TickerCache = ExpiringCache<RawTicker>;
