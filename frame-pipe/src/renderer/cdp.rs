//! Minimal Chrome DevTools Protocol client.
//!
//! One websocket, a writer task fed by a bounded channel and a reader task that
//! routes responses to their caller by id and broadcasts events. A caller that
//! gives up on a request just drops its receiver; the late response is discarded.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_tungstenite::tungstenite::Message as WsMessage;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::RendererError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub session_id: Option<String>,
    pub params: Value,
}

#[derive(Debug)]
pub(crate) enum CdpMessage {
    Response {
        id: u64,
        result: Result<Value, String>,
    },
    Event(CdpEvent),
}

pub struct CdpClient {
    next_id: AtomicU64,
    outgoing: mpsc::Sender<String>,
    pending: Pending,
    events: broadcast::Sender<CdpEvent>,
    cancel: CancellationToken,
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> anyhow::Result<Self> {
        let (ws, _) =
            tokio::time::timeout(CONNECT_TIMEOUT, async_tungstenite::tokio::connect_async(ws_url))
                .await??;
        log::debug!("cdp: connected to {}", ws_url);

        let (mut ws_sink, mut ws_stream) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::channel::<String>(64);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(256);
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => break,
                    msg = outgoing_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = ws_sink.send(WsMessage::Text(msg.into())).await {
                            log::warn!("cdp: send failed: {}", e);
                            break;
                        }
                    }
                }
            }
            let _ = ws_sink.close().await;
            cancel_clone.cancel();
        });

        let cancel_clone = cancel.clone();
        let pending_clone = Arc::clone(&pending);
        let events_clone = events.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = cancel_clone.cancelled() => break,
                    msg = ws_stream.next() => msg,
                };
                match msg {
                    Some(Ok(WsMessage::Text(text))) => match parse_message(text.as_str()) {
                        Some(CdpMessage::Response { id, result }) => {
                            let waiter = pending_clone.lock().map(|mut p| p.remove(&id));
                            if let Ok(Some(waiter)) = waiter {
                                let _ = waiter.send(result);
                            }
                        }
                        Some(CdpMessage::Event(event)) => {
                            let _ = events_clone.send(event);
                        }
                        None => log::trace!("cdp: ignoring message {}", text.as_str()),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        log::info!("cdp: connection closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("cdp: receive failed: {}", e);
                        break;
                    }
                }
            }
            cancel_clone.cancel();
            // dropping the senders wakes every waiter with an error
            if let Ok(mut pending) = pending_clone.lock() {
                pending.clear();
            }
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            outgoing,
            pending,
            events,
            cancel,
        })
    }

    pub async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, RendererError> {
        if self.is_closed() {
            return Err(RendererError::Unavailable("devtools connection closed".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            request["sessionId"] = Value::String(session_id.to_string());
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| RendererError::Failed(anyhow::anyhow!("cdp pending map poisoned")))?
            .insert(id, tx);

        if self.outgoing.send(request.to_string()).await.is_err() {
            return Err(RendererError::Unavailable("devtools connection closed".into()));
        }

        let reply = match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(reply) => reply,
            Err(_) => {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.remove(&id);
                }
                return Err(RendererError::Unavailable(format!("{} got no reply", method)));
            }
        };
        match reply {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(error_reply(method, &message)),
            Err(_) => Err(RendererError::Unavailable(format!(
                "devtools connection closed during {}",
                method
            ))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Error replies that mean the page target or its session no longer exists.
const TARGET_GONE: &[&str] = &[
    "Session with given id not found",
    "No target with given id",
    "Target closed",
    "Not attached to an active page",
];

fn error_reply(method: &str, message: &str) -> RendererError {
    if TARGET_GONE.iter().any(|gone| message.contains(gone)) {
        RendererError::Unavailable(format!("{} failed: {}", method, message))
    } else {
        RendererError::Failed(anyhow::anyhow!("{} failed: {}", method, message))
    }
}

pub(crate) fn parse_message(text: &str) -> Option<CdpMessage> {
    let value: Value = serde_json::from_str(text).ok()?;
    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let result = match value.get("error") {
            Some(error) => Err(error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string()),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Some(CdpMessage::Response { id, result });
    }

    let method = value.get("method")?.as_str()?.to_string();
    Some(CdpMessage::Event(CdpEvent {
        method,
        session_id: value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string),
        params: value.get("params").cloned().unwrap_or(Value::Null),
    }))
}
