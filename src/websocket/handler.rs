use std::sync::Arc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response, ErrorResponse};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use log::{debug, info, warn, error};

use crate::config::SUBSCRIBER_CHANNEL_SIZE;
use crate::data::{Broadcaster, MarketKey, PollerSupervisor, SubscriberHandle};
use crate::exchange::ExchangeRegistry;

pub const TICKER_PATH_PREFIX: &str = "/ws/ticker/";

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

// Shared services every connection needs.
#[derive(Clone)]
pub struct WsContext {
    pub broadcaster: Arc<Broadcaster>,
    pub supervisor: Arc<PollerSupervisor>,
    pub registry: Arc<ExchangeRegistry>,
}

// Extracts the market key from `/ws/ticker/{exchange}/{symbol}`.
// The symbol is the percent-decoded remainder and may contain `/`.
pub fn parse_ticker_path(path: &str) -> Option<MarketKey> {
    let rest = path.strip_prefix(TICKER_PATH_PREFIX)?;
    let (exchange, symbol) = rest.split_once('/')?;
    let exchange = urlencoding::decode(exchange).ok()?;
    let symbol = urlencoding::decode(symbol).ok()?;
    if exchange.trim().is_empty() || symbol.trim().is_empty() {
        return None;
    }
    Some(MarketKey::new(&exchange, &symbol))
}

// Accepts connections until `shutdown` fires.
pub async fn serve(listener: TcpListener, ctx: WsContext, shutdown: CancellationToken) {
    info!("Ready to accept WebSocket connections");

    loop {
        let (stream, addr) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("WebSocket listener stopped accepting connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    error!("Failed to accept WebSocket connection: {}", e);
                    continue;
                }
            },
        };

        let handler = WebSocketHandler::new(ctx.clone(), addr.to_string());
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            handler.handle_connection(stream, shutdown).await;
        });
    }
}

pub struct WebSocketHandler {
    ctx: WsContext,
    peer_addr: String,
}

impl WebSocketHandler {
    pub fn new(ctx: WsContext, peer_addr: String) -> Self {
        Self { ctx, peer_addr }
    }

    pub async fn handle_connection(self, stream: TcpStream, shutdown: CancellationToken) {
        let mut key: Option<MarketKey> = None;

        let ws_stream = match accept_hdr_async(stream, |req: &Request, response: Response| {
            let path = req.uri().path();
            info!("WebSocket connection request for path: {} from {}", path, self.peer_addr);

            match parse_ticker_path(path) {
                Some(parsed) if self.ctx.registry.supports(&parsed.exchange) => {
                    key = Some(parsed);
                    Ok(response)
                }
                Some(parsed) => {
                    warn!("Unsupported exchange '{}' requested by {}", parsed.exchange, self.peer_addr);
                    Err(self.create_error_response(
                        StatusCode::NOT_FOUND,
                        &format!("Unsupported exchange: {}", parsed.exchange),
                    ))
                }
                None => {
                    warn!("Unknown WebSocket path '{}' from {}", path, self.peer_addr);
                    Err(self.create_error_response(StatusCode::NOT_FOUND, "Invalid WebSocket path"))
                }
            }
        }).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake failed for {}: {:?}", self.peer_addr, e);
                return;
            }
        };

        let key = match key {
            Some(key) => key,
            None => {
                error!("No market key captured for {} after handshake", self.peer_addr);
                return;
            }
        };

        self.handle_websocket_connection(ws_stream, key, shutdown).await;
    }

    fn create_error_response(&self, status: StatusCode, message: &str) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(message.to_string()));
        *response.status_mut() = status;
        response
    }

    async fn handle_websocket_connection(
        &self,
        ws_stream: WebSocketStream<TcpStream>,
        key: MarketKey,
        shutdown: CancellationToken,
    ) {
        let (mut write, read) = ws_stream.split();
        let topic = key.topic();

        let (handle, subscription_rx) = SubscriberHandle::channel(SUBSCRIBER_CHANNEL_SIZE);
        let subscriber_id = handle.id();
        self.ctx.broadcaster.subscribe(&topic, handle);
        info!("Subscriber {} joined {} from {}", subscriber_id, topic, self.peer_addr);

        if let Err(e) = self.ctx.supervisor.ensure(&key) {
            warn!("Could not start polling {} for {}: {}", topic, self.peer_addr, e);
            self.ctx.broadcaster.unsubscribe(&topic, subscriber_id);
            let frame = CloseFrame {
                code: CloseCode::Again,
                reason: e.to_string().into(),
            };
            if let Err(e) = write.send(Message::Close(Some(frame))).await {
                debug!("Error sending close frame to {}: {:?}", self.peer_addr, e);
            }
            return;
        }

        // Create channels for coordination
        let (close_tx, close_rx) = mpsc::channel::<()>(1);
        let (echo_tx, echo_rx) = mpsc::channel::<String>(SUBSCRIBER_CHANNEL_SIZE);

        let mut write_task = self.spawn_write_task(write, subscription_rx, echo_rx, close_rx, shutdown);
        let mut read_task = self.spawn_read_task(read, close_tx, echo_tx);

        tokio::select! {
            _ = &mut write_task => {
                debug!("Write task completed for {}", self.peer_addr);
            }
            _ = &mut read_task => {
                debug!("Read task completed for {}", self.peer_addr);
            }
        }
        write_task.abort();
        read_task.abort();

        // Cleanup
        self.ctx.broadcaster.unsubscribe(&topic, subscriber_id);
        info!("Subscriber {} left {} ({})", subscriber_id, topic, self.peer_addr);
    }

    fn spawn_write_task(
        &self,
        mut write: WsSink,
        mut subscription_rx: mpsc::Receiver<String>,
        mut echo_rx: mpsc::Receiver<String>,
        mut close_rx: mpsc::Receiver<()>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let peer_addr = self.peer_addr.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Handle published tickers
                    Some(message) = subscription_rx.recv() => {
                        if let Err(e) = write.send(Message::Text(message)).await {
                            warn!("Error sending ticker to {}: {:?}", peer_addr, e);
                            break;
                        }
                    }
                    Some(reply) = echo_rx.recv() => {
                        if let Err(e) = write.send(Message::Text(reply)).await {
                            warn!("Error sending echo to {}: {:?}", peer_addr, e);
                            break;
                        }
                    }
                    _ = close_rx.recv() => {
                        debug!("Received close signal for {}", peer_addr);
                        break;
                    }
                    _ = shutdown.cancelled() => {
                        let frame = CloseFrame {
                            code: CloseCode::Away,
                            reason: "Server shutting down".into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!("Error sending close frame to {}: {:?}", peer_addr, e);
                        }
                        break;
                    }
                }
            }
        })
    }

    fn spawn_read_task(
        &self,
        mut read: WsSource,
        close_tx: mpsc::Sender<()>,
        echo_tx: mpsc::Sender<String>,
    ) -> JoinHandle<()> {
        let peer_addr = self.peer_addr.clone();

        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(msg) => match msg {
                        Message::Text(text) => {
                            debug!("Received text message from {}: {}", peer_addr, text);
                            if echo_tx.send(format!("received: {}", text)).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(close_frame) => {
                            info!("Received close frame from {}: {:?}", peer_addr, close_frame);
                            let _ = close_tx.send(()).await;
                            break;
                        }
                        Message::Binary(data) => {
                            debug!("Ignoring binary message from {}: {} bytes", peer_addr, data.len());
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                    },
                    Err(e) => {
                        warn!("Error reading message from {}: {:?}", peer_addr, e);
                        let _ = close_tx.send(()).await;
                        break;
                    }
                }
            }
        })
    }
}
