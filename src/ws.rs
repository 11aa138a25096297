//! Websocket driver (C1).
//!
//! Opens a framed text-message connection to a URL and forwards lifecycle
//! events onto a channel, so [`crate::runner`] can multiplex it alongside
//! heartbeat ticks and control messages via `tokio::select!` (§4.1, §5).
//! Built on `tokio-tungstenite`, the same transport the reference crate
//! depends on.

use crate::error::GatewayError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

/// Default maximum text/binary frame size accepted from the peer (§4.1).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// A lifecycle event emitted by the driver (§3 "Websocket event").
#[derive(Debug)]
pub enum WsEvent {
    /// The connection was established.
    Connect,
    /// A text frame was received.
    Message(String),
    /// A transport-level error occurred (connection continues until the
    /// terminating `Disconnect`).
    Error(String),
    /// The connection is closed. Always the last event for a given
    /// connection.
    Disconnect(u16, String),
}

type Sink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// A live connection: the sending half plus a handle to close it.
pub struct WsHandle {
    sink: tokio::sync::Mutex<Sink>,
    closed: std::sync::atomic::AtomicBool,
}

impl WsHandle {
    /// Send a text frame. Fails if the connection has already been closed
    /// locally.
    pub async fn send_text(&self, text: String) -> Result<(), GatewayError> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(GatewayError::ChannelClosed(
                "websocket already closed".into(),
            ));
        }
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    /// Close the connection. Idempotent — closing twice is a no-op past
    /// the first call (§4.1).
    pub async fn close(&self) {
        if self
            .closed
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "error closing websocket (ignored)");
        }
    }
}

/// Connect to `url`, returning a handle to send frames/close, plus a
/// receiver of lifecycle events. `max_frame_bytes` bounds both text and
/// binary frame sizes accepted from the peer.
pub async fn connect(
    url: &str,
    max_frame_bytes: usize,
) -> Result<(std::sync::Arc<WsHandle>, mpsc::UnboundedReceiver<WsEvent>), GatewayError> {
    let config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default()
        .max_message_size(Some(max_frame_bytes))
        .max_frame_size(Some(max_frame_bytes));

    // TLS endpoint identification ("HTTPS" mode) is enabled by default by
    // the native-roots connector; no custom Connector is required for the
    // standard `wss://` scheme.
    let (ws_stream, _response) =
        connect_async_tls_with_config(url, Some(config), false, None as Option<Connector>).await?;

    let (sink, mut stream) = ws_stream.split();
    let handle = std::sync::Arc::new(WsHandle {
        sink: tokio::sync::Mutex::new(sink),
        closed: std::sync::atomic::AtomicBool::new(false),
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(WsEvent::Connect);

    let forward_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if tx.send(WsEvent::Message(text.to_string())).is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                    // tungstenite answers pings automatically; nothing to surface.
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    // The driver is text-frame-only (§4.1); binary frames
                    // are not part of this protocol's happy path and are
                    // dropped rather than surfaced as a payload.
                }
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = close_frame_parts(frame);
                    let _ = tx.send(WsEvent::Disconnect(code, reason));
                    break;
                }
                Some(Err(e)) => {
                    if tx.send(WsEvent::Error(e.to_string())).is_err() {
                        break;
                    }
                }
                None => {
                    let _ = tx.send(WsEvent::Disconnect(0, "stream ended".to_string()));
                    break;
                }
            }
        }
        forward_handle
            .closed
            .store(true, std::sync::atomic::Ordering::Release);
    });

    Ok((handle, rx))
}

/// Append the protocol version and encoding query parameters to a gateway
/// URL, the way the reference crate's `Shard::build_gateway_url` does.
/// `encoding=json` is always forced since compression/ETF are non-goals
/// (§1).
pub fn build_url(base: &str) -> Result<String, GatewayError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut()
        .append_pair("v", &crate::GATEWAY_VERSION.to_string())
        .append_pair("encoding", "json");
    Ok(url.to_string())
}

fn close_frame_parts(frame: Option<CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (u16::from(f.code), f.reason.to_string()),
        None => (0, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_forces_json_encoding() {
        let url = build_url("wss://gateway.example.com").unwrap();
        assert!(url.contains("v=10"));
        assert!(url.contains("encoding=json"));
    }

    #[test]
    fn build_url_rejects_garbage() {
        assert!(build_url("not a url").is_err());
    }
}
