use std::time::Duration;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use log::{debug, info, error};
use tower_http::cors::CorsLayer;

use market_relay::config::{Config, CMC_REQUEST_TIMEOUT_SECS, STATS_INTERVAL_SECS};
use market_relay::data::{Broadcaster, PollerSupervisor, TickerCache};
use market_relay::exchange::{ClientOptions, ExchangeRegistry};
use market_relay::api::{ApiState, create_api_router};
use market_relay::websocket::{self, WsContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    // Log configuration
    config.log_config();

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    // Shared state
    let cache = Arc::new(TickerCache::new(config.cache_capacity()?, config.cache_ttl()));
    let broadcaster = Arc::new(Broadcaster::new());
    let registry = Arc::new(ExchangeRegistry::with_defaults(ClientOptions::new(config.exchange_timeout())?));
    let supervisor = Arc::new(PollerSupervisor::new(
        registry.clone(),
        cache.clone(),
        broadcaster.clone(),
        config.poll_interval(),
    ));
    info!("Cache ready: {} entries max, ttl {:?}", cache.capacity(), cache.ttl());
    info!("Exchanges available: {}", registry.exchanges().join(", "));

    let shutdown = CancellationToken::new();
    start_background_tasks(cache.clone(), broadcaster.clone(), supervisor.clone(), shutdown.clone());

    // Start API server
    let api_state = ApiState {
        cache: cache.clone(),
        supervisor: supervisor.clone(),
        registry: registry.clone(),
        broadcaster: broadcaster.clone(),
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(CMC_REQUEST_TIMEOUT_SECS))
            .build()?,
        cmc_api_key: config.cmc_api_key.clone(),
        cmc_base_url: config.cmc_base_url.clone(),
    };

    let api_router = create_api_router(api_state)
        .layer(CorsLayer::permissive()); // Enable CORS for web clients

    let api_listener = TcpListener::bind(&config.api_bind_address).await?;
    info!("HTTP API server running at http://{}", config.api_bind_address);

    let api_shutdown = shutdown.clone();
    let api_server = tokio::spawn(async move {
        axum::serve(api_listener, api_router)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
            .await
    });

    // Start WebSocket server
    let ws_listener = TcpListener::bind(&config.ws_bind_address).await?;
    info!("WebSocket server running at ws://{}/ws/ticker/{{exchange}}/{{symbol}}", config.ws_bind_address);

    let ws_context = WsContext {
        broadcaster: broadcaster.clone(),
        supervisor: supervisor.clone(),
        registry: registry.clone(),
    };
    let ws_server = tokio::spawn(websocket::serve(ws_listener, ws_context, shutdown.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down..."),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
    shutdown.cancel();

    match api_server.await {
        Ok(Ok(())) => info!("HTTP API server stopped"),
        Ok(Err(e)) => error!("HTTP API server error: {}", e),
        Err(e) => error!("HTTP API server task failed: {}", e),
    }
    if let Err(e) = ws_server.await {
        error!("WebSocket server task failed: {}", e);
    }

    supervisor.shutdown(config.shutdown_timeout()).await;
    info!("Shutdown complete");

    Ok(())
}

fn start_background_tasks(
    cache: Arc<TickerCache>,
    broadcaster: Arc<Broadcaster>,
    supervisor: Arc<PollerSupervisor>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(STATS_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval_timer.tick() => {}
            }

            let purged = cache.purge_expired();
            let (topic_count, subscriber_count) = broadcaster.get_stats();
            let poller_count = supervisor.running_count();

            if topic_count > 0 || poller_count > 0 || purged > 0 {
                info!("Stats - Pollers: {}, Topics: {}, Subscribers: {}, Cache entries: {} ({} expired purged)",
                      poller_count, topic_count, subscriber_count, cache.len(), purged);
                debug!("Active topics: {:?}", broadcaster.get_topic_list());
            }
        }
    });

    info!("Started stats monitoring task (every {} seconds)", STATS_INTERVAL_SECS);
}
