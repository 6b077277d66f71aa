//! Chrome DevTools Protocol WebSocket client for a single page target.
//!
//! Commands carry auto-incrementing ids and are correlated with their
//! responses by a background reader task; everything without an id is an
//! event and goes to the channel returned from [`CdpClient::connect`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use gptdrive_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A CDP event pushed by the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
struct CdpCommand {
    id: u64,
    method: String,
    params: Value,
}

#[derive(Debug, Clone)]
pub struct CdpResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<CdpResponseError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
}

impl CdpResponseError {
    /// Map a protocol error onto the crate error. Lost remote objects mean the
    /// element or its document went away.
    pub fn into_error(self, method: &str) -> Error {
        let lost = [
            "Could not find object with given id",
            "Cannot find context with specified id",
            "No node with given id",
            "Node is detached from document",
        ];
        if lost.iter().any(|m| self.message.contains(m)) {
            Error::StaleElement(format!("{method}: {}", self.message))
        } else {
            Error::Browser(format!("{method} failed ({}): {}", self.code, self.message))
        }
    }
}

pub struct CdpClient {
    next_id: AtomicU64,
    pending: Pending,
    writer: Mutex<WsSink>,
    reader: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a target's `webSocketDebuggerUrl`.
    pub async fn connect(ws_url: &str) -> Result<(Self, mpsc::UnboundedReceiver<CdpEvent>)> {
        debug!("Connecting to DevTools at {}", ws_url);

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| Error::Browser(format!("DevTools connect to {ws_url} failed: {e}")))?;
        let (writer, reader) = ws_stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(Self::read_loop(reader, Arc::clone(&pending), event_tx));

        Ok((
            Self {
                next_id: AtomicU64::new(1),
                pending,
                writer: Mutex::new(writer),
                reader,
            },
            event_rx,
        ))
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.send_with_timeout(method, params, COMMAND_TIMEOUT).await
    }

    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&CdpCommand {
            id,
            method: method.to_string(),
            params,
        })?;

        // Register before sending so a fast reply cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let sent = self
            .writer
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await;
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(Error::Browser(format!("DevTools send failed: {e}")));
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::Browser("DevTools connection closed".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::OperationTimeout(format!("{method} after {timeout:?}")));
            }
        };

        if let Some(err) = response.error {
            return Err(err.into_error(method));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send(&format!("{domain}.enable"), serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn read_loop(
        mut reader: SplitStream<WsStream>,
        pending: Pending,
        event_tx: mpsc::UnboundedSender<CdpEvent>,
    ) {
        while let Some(msg) = reader.next().await {
            let text = match msg {
                Ok(Message::Text(t)) => t.to_string(),
                Ok(Message::Binary(b)) => match String::from_utf8(b.to_vec()) {
                    Ok(s) => s,
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => {
                    info!("DevTools socket closed by browser");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("DevTools read error: {}", e);
                    break;
                }
            };

            let json: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Unparseable DevTools message: {}", e);
                    continue;
                }
            };

            if let Some(response) = parse_cdp_response(&json) {
                if let Some(tx) = pending.lock().await.remove(&response.id) {
                    let _ = tx.send(response);
                }
            } else if let Some(event) = parse_cdp_event(&json) {
                let _ = event_tx.send(event);
            }
        }

        for (id, tx) in pending.lock().await.drain() {
            let _ = tx.send(CdpResponse {
                id,
                result: None,
                error: Some(CdpResponseError {
                    code: -1,
                    message: "WebSocket connection closed".to_string(),
                    data: None,
                }),
            });
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub fn parse_cdp_response(json: &Value) -> Option<CdpResponse> {
    let id = json.get("id")?.as_u64()?;
    Some(CdpResponse {
        id,
        result: json.get("result").cloned(),
        error: json
            .get("error")
            .and_then(|e| serde_json::from_value(e.clone()).ok()),
    })
}

pub fn parse_cdp_event(json: &Value) -> Option<CdpEvent> {
    if json.get("id").is_some() {
        return None;
    }
    let method = json.get("method")?.as_str()?.to_string();
    let params = json.get("params").cloned().unwrap_or(Value::Null);
    Some(CdpEvent { method, params })
}
