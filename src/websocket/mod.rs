pub mod handler;

pub use handler::{parse_ticker_path, serve, WebSocketHandler, WsContext};
