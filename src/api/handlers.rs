use std::sync::Arc;
use std::time::Duration;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use log::{debug, info, warn};

use crate::data::{Broadcaster, MarketKey, Ohlcv, PollerSupervisor, Ticker, TickerCache};
use crate::error::ApiError;
use crate::exchange::{ExchangeClient, ExchangeRegistry};

pub const DEFAULT_TIMEFRAME: &str = "1m";
pub const DEFAULT_OHLCV_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct ApiState {
    pub cache: Arc<TickerCache>,
    pub supervisor: Arc<PollerSupervisor>,
    pub registry: Arc<ExchangeRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub http: reqwest::Client,
    pub cmc_api_key: Option<String>,
    pub cmc_base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct OhlcvQuery {
    pub timeframe: Option<String>,
    pub since: Option<i64>,
    pub limit: Option<u32>,
}

async fn close_client(client: &dyn ExchangeClient, timeout: Duration, key: &MarketKey) {
    match tokio::time::timeout(timeout, client.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Error closing one-shot client for {}: {}", key, e),
        Err(_) => warn!("Timed out closing one-shot client for {}", key),
    }
}

// GET /tickers/{exchange}/{symbol} - Latest ticker, served from cache when warm
pub async fn get_ticker(
    State(state): State<ApiState>,
    Path((exchange, symbol)): Path<(String, String)>,
) -> Result<Json<Ticker>, ApiError> {
    let key = MarketKey::new(&exchange, &symbol);

    // Keeps the cache warm for later requests and subscribers.
    state.supervisor.ensure(&key)?;

    let topic = key.topic();
    if let Some(raw) = state.cache.get(&topic) {
        debug!("Cache hit for {}", topic);
        return Ok(Json(Ticker::from_raw(raw, &key.symbol)));
    }

    let client = state.registry.create(&key.exchange)?;
    let result = client.fetch_ticker(&key.symbol).await;
    close_client(client.as_ref(), state.registry.close_timeout(), &key).await;

    let raw = result.map_err(|e| {
        warn!("Fetch ticker failed for {}: {}", topic, e);
        ApiError::from(e)
    })?;

    // The refresh loop may have stored a newer value while this fetch ran.
    if !state.cache.put_if_absent(topic.clone(), raw.clone()) {
        debug!("Kept newer cached ticker for {}", topic);
    }
    Ok(Json(Ticker::from_raw(raw, &key.symbol)))
}

// GET /ohlcv/{exchange}/{symbol}?timeframe&since&limit - One-shot candle fetch
pub async fn get_ohlcv(
    State(state): State<ApiState>,
    Path((exchange, symbol)): Path<(String, String)>,
    query: Result<Query<OhlcvQuery>, QueryRejection>,
) -> Result<Json<Vec<Ohlcv>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let key = MarketKey::new(&exchange, &symbol);

    let timeframe = query.timeframe.as_deref().unwrap_or(DEFAULT_TIMEFRAME);
    let limit = query.limit.unwrap_or(DEFAULT_OHLCV_LIMIT);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be greater than zero".to_string()));
    }

    let client = state.registry.create(&key.exchange)?;
    let result = client
        .fetch_ohlcv(&key.symbol, timeframe, query.since, Some(limit))
        .await;
    close_client(client.as_ref(), state.registry.close_timeout(), &key).await;

    let rows = result.map_err(|e| {
        warn!("Fetch ohlcv failed for {}: {}", key, e);
        ApiError::from(e)
    })?;

    Ok(Json(rows.into_iter().map(Ohlcv::from).collect()))
}

// GET /cmc/quotes/{symbol} - CoinMarketCap passthrough
pub async fn get_cmc_quote(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let api_key = state
        .cmc_api_key
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("CMC API key not configured".to_string()))?;

    let url = format!(
        "{}/v1/cryptocurrency/quotes/latest",
        state.cmc_base_url.trim_end_matches('/')
    );
    let upstream_error = || ApiError::Upstream("CMC upstream error".to_string());

    let response = state
        .http
        .get(&url)
        .query(&[("symbol", symbol.as_str())])
        .header("X-CMC_PRO_API_KEY", api_key)
        .send()
        .await
        .map_err(|e| {
            warn!("CMC request for {} failed: {}", symbol, e);
            upstream_error()
        })?;

    if response.status() != reqwest::StatusCode::OK {
        warn!("CMC returned {} for {}", response.status(), symbol);
        return Err(upstream_error());
    }

    let body = response.json::<serde_json::Value>().await.map_err(|e| {
        warn!("CMC response for {} was not JSON: {}", symbol, e);
        upstream_error()
    })?;

    info!("Served CMC quote for {}", symbol);
    Ok(Json(body))
}

// GET /exchanges - Identifiers accepted in paths
pub async fn list_exchanges(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.registry.exchanges())
}

// GET /health - Health check endpoint
pub async fn health_check(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let (topics, subscribers) = state.broadcaster.get_stats();
    Json(serde_json::json!({
        "status": if state.supervisor.is_shutting_down() { "shutting_down" } else { "healthy" },
        "service": env!("CARGO_PKG_NAME"),
        "timestamp": chrono::Utc::now(),
        "pollers": state.supervisor.running_count(),
        "topics": topics,
        "subscribers": subscribers,
        "cache_entries": state.cache.len(),
    }))
}

// Create the API router
pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/exchanges", get(list_exchanges))
        .route("/tickers/:exchange/*symbol", get(get_ticker))
        .route("/ohlcv/:exchange/*symbol", get(get_ohlcv))
        .route("/cmc/quotes/:symbol", get(get_cmc_quote))
        .with_state(state)
}
