//! WebSocket gateway (C8)
//!
//! Runs an axum HTTP server that upgrades browser connections to
//! WebSocket and bridges each one to exactly one upstream TCP connection
//! to the control server, using the same framed protocol end to end: the
//! gateway speaks plaintext upstream until it observes `login_ok`, then
//! mirrors the session key and switches both directions to AES-GCM.
//! Grounded in the source's `gateway_ws.py`, which performs this same
//! mirroring rather than terminating auth itself.

use std::sync::{Arc, Mutex};

use axum::{
    extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use base64::Engine as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tower_http::cors::{Any, CorsLayer};

use parlor_protocol::wire::{read_plain_value, read_secure_value, write_plain, write_secure};

/// No WebSocket close code maps exactly onto HTTP's 502; 1013 ("Try Again
/// Later") is the closest standard code for "the thing behind me is down".
const CLOSE_UPSTREAM_UNAVAILABLE: u16 = 1013;
/// Used when a pump hits a framing or crypto error after the upstream
/// connection was established.
const CLOSE_SERVER_ERROR: u16 = 1011;

/// Shared state for the WS gateway.
pub struct GatewayState {
    /// `host:port` of the upstream control-plane TCP server.
    pub upstream_addr: String,
}

/// Builds the gateway's axum router: `/ws` for the upgrade, `/health` for
/// a liveness probe. CORS is permissive, matching the control server's
/// own trust model (the session key, not origin, is what protects a room).
pub fn ws_router(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

async fn handle_session(socket: WebSocket, state: Arc<GatewayState>) {
    let upstream = match TcpStream::connect(&state.upstream_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(addr = %state.upstream_addr, error = %e, "failed to reach control server");
            close_with_code(socket, CLOSE_UPSTREAM_UNAVAILABLE, "upstream unavailable").await;
            return;
        }
    };
    let _ = upstream.set_nodelay(true);
    let (upstream_read, upstream_write) = upstream.into_split();
    let (ws_sink, ws_stream) = socket.split();

    // Shared across both pumps: None until the upstream `login_ok` is
    // observed, at which point every subsequent frame in both directions
    // is AES-GCM.
    let key: Arc<Mutex<Option<[u8; 32]>>> = Arc::new(Mutex::new(None));

    let mut upstream_to_ws = Box::pin(pump_tcp_to_ws(upstream_read, ws_sink, key.clone()));
    let mut ws_to_upstream = Box::pin(pump_ws_to_tcp(ws_stream, upstream_write, key));

    tokio::select! {
        result = &mut upstream_to_ws => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "upstream pump ended");
            }
        }
        result = &mut ws_to_upstream => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "browser pump ended");
            }
        }
    }
}

async fn close_with_code(socket: WebSocket, code: u16, reason: &'static str) {
    let (mut sink, _stream) = socket.split();
    let _ = sink
        .send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Browser-originated JSON text frames, forwarded upstream as TCP frames.
/// Non-text frames (ping/pong/binary) are ignored per the gateway's
/// contract; a close frame or transport error ends the pump.
async fn pump_ws_to_tcp(
    mut ws_stream: SplitStream<WebSocket>,
    mut upstream_write: OwnedWriteHalf,
    key: Arc<Mutex<Option<[u8; 32]>>>,
) -> Result<(), GatewayError> {
    while let Some(message) = ws_stream.next().await {
        let message = message.map_err(|e| GatewayError::Transport(e.to_string()))?;
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return Ok(()),
            _ => continue,
        };

        let value: Value = match serde_json::from_str(text.as_str()) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let current_key = *key.lock().unwrap();
        let result = match current_key {
            Some(k) => write_secure(&mut upstream_write, &k, &value).await,
            None => write_plain(&mut upstream_write, &value).await,
        };
        result.map_err(|e| GatewayError::Codec(e.to_string()))?;
    }
    Ok(())
}

/// Upstream TCP frames, forwarded to the browser as JSON text frames.
/// Watches for the `login_ok` reply to learn the session key and flip
/// both pumps over to the secure codec.
async fn pump_tcp_to_ws(
    mut upstream_read: OwnedReadHalf,
    mut ws_sink: SplitSink<WebSocket, WsMessage>,
    key: Arc<Mutex<Option<[u8; 32]>>>,
) -> Result<(), GatewayError> {
    loop {
        let current_key = *key.lock().unwrap();
        let read_result = match current_key {
            Some(k) => read_secure_value(&mut upstream_read, &k).await,
            None => read_plain_value(&mut upstream_read).await,
        };
        let value = match read_result {
            Ok(v) => v,
            Err(e) => {
                close_with_server_error(&mut ws_sink).await;
                return Err(GatewayError::Codec(e.to_string()));
            }
        };

        if current_key.is_none() {
            if let Some(new_key) = extract_session_key(&value) {
                *key.lock().unwrap() = Some(new_key);
            }
        }

        let text = match serde_json::to_string(&value) {
            Ok(t) => t,
            Err(e) => {
                close_with_server_error(&mut ws_sink).await;
                return Err(GatewayError::Codec(e.to_string()));
            }
        };
        if ws_sink.send(WsMessage::Text(text.into())).await.is_err() {
            return Ok(());
        }
    }
}

async fn close_with_server_error(ws_sink: &mut SplitSink<WebSocket, WsMessage>) {
    let _ = ws_sink
        .send(WsMessage::Close(Some(CloseFrame {
            code: CLOSE_SERVER_ERROR,
            reason: "upstream codec error".into(),
        })))
        .await;
}

/// Pulls the AES-GCM session key out of a `login_ok` reply, if this value
/// is one.
fn extract_session_key(value: &Value) -> Option<[u8; 32]> {
    if value.get("type").and_then(Value::as_str) != Some("login_ok") {
        return None;
    }
    let key_b64 = value.get("aes_key_b64").and_then(Value::as_str)?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(key_b64).ok()?;
    if decoded.len() != 32 {
        return None;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded);
    Some(key)
}

#[derive(Debug)]
enum GatewayError {
    Transport(String),
    Codec(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "websocket transport error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_session_key_from_login_ok() {
        let key = [9u8; 32];
        let b64 = base64::engine::general_purpose::STANDARD.encode(key);
        let value = json!({ "ok": true, "type": "login_ok", "token": "abc", "aes_key_b64": b64 });
        assert_eq!(extract_session_key(&value), Some(key));
    }

    #[test]
    fn test_extract_session_key_ignores_other_replies() {
        let value = json!({ "ok": true, "type": "joined", "room": "R", "members": [] });
        assert_eq!(extract_session_key(&value), None);
    }

    #[test]
    fn test_extract_session_key_rejects_bad_length() {
        let value = json!({ "type": "login_ok", "aes_key_b64": base64::engine::general_purpose::STANDARD.encode([1u8; 10]) });
        assert_eq!(extract_session_key(&value), None);
    }
}
