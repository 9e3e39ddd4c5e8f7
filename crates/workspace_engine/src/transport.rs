//! WebSocket wire transport (§4.4/§4.5): the concrete `SyncTransport`
//! implementation that actually talks to a server, as opposed to the
//! `socket` module's pure lifecycle state machine.
//!
//! Mirrors the teacher's own `tokio-tungstenite` reconnect loop: one
//! persistent connection per account, JSON frames in both directions,
//! mutations pushed as `{"op": "mutation", ...}` frames and pull requests
//! answered with `{"op": "pull_result", ...}` frames.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use crate::error::{EngineError, Result};
use crate::queue::Mutation;
use crate::sync::{PullBatch, SyncTransport};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One open WebSocket connection to a sync endpoint, wrapped as a [`SyncTransport`].
pub struct WebSocketTransport {
    socket: Mutex<Socket>,
}

impl WebSocketTransport {
    /// Connect to `url` (e.g. `wss://sync.example.com/ws`).
    pub async fn connect(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| EngineError::Validation(format!("invalid sync endpoint: {e}")))?;
        let (socket, _response) = connect_async(parsed.as_str())
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    async fn send(&self, frame: Value) -> Result<()> {
        let mut socket = self.socket.lock().await;
        socket
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))
    }

    async fn recv_json(&self) -> Result<Value> {
        let mut socket = self.socket.lock().await;
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                serde_json::from_str(&text).map_err(EngineError::Json)
            }
            Some(Ok(_)) => Err(EngineError::TransientNetwork(
                "unexpected non-text frame from sync endpoint".into(),
            )),
            Some(Err(e)) => Err(EngineError::TransientNetwork(e.to_string())),
            None => Err(EngineError::TransientNetwork(
                "sync connection closed".into(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl SyncTransport for WebSocketTransport {
    async fn push_mutation(&self, mutation: &Mutation) -> Result<()> {
        self.send(json!({
            "op": "mutation",
            "id": mutation.id,
            "type": mutation.mutation_type,
            "data": mutation.data,
        }))
        .await?;

        let ack = self.recv_json().await?;
        match ack.get("op").and_then(Value::as_str) {
            Some("mutation_ack") => Ok(()),
            Some("error") => {
                let code = ack
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string();
                let message = ack
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Err(EngineError::ServerApplication { code, message })
            }
            _ => Err(EngineError::TransientNetwork(
                "malformed response to mutation push".into(),
            )),
        }
    }

    async fn pull(&self, stream: &str, cursor: Option<&str>) -> Result<PullBatch> {
        self.send(json!({
            "op": "pull",
            "stream": stream,
            "cursor": cursor,
        }))
        .await?;

        let response = self.recv_json().await?;
        let records = response
            .get("records")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next_cursor = response
            .get("nextCursor")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(PullBatch {
            records,
            next_cursor,
        })
    }
}
