//! Surface whose primitives execute on a detached host.
//!
//! Each primitive becomes an `action-request` envelope with a fresh
//! correlation id sent over the attached channel. The call suspends until
//! the matching `action-response` arrives, the deadline passes, or the
//! channel goes away. Every correlation resolves at most once: the pending
//! entry is removed by whichever of those happens first.
//!
//! Envelopes (JSON text, discriminated by `kind`):
//! - out: `{kind: "action-request", action, params, id}`
//! - in:  `{kind: "action-response", id, success, result?, error?}`
//! - in:  `{kind: "screenshot", data}` and `{kind: "url", url}`, unsolicited

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use surfpilot_core::types::{Environment, MouseButton, Point, UiAction};
use surfpilot_core::{Error, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::surface::{validate_drag_path, Surface};

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

struct Channel {
    tx: Option<mpsc::Sender<String>>,
    generation: u64,
}

#[derive(Default)]
struct PushCache {
    screenshot: Option<String>,
    url: Option<String>,
}

pub struct RemoteExecutor {
    session_id: String,
    environment: Environment,
    width: u32,
    height: u32,
    timeout: Duration,
    channel: Mutex<Channel>,
    pending: Pending,
    cache: Mutex<PushCache>,
}

/// `<unix-millis>-<8 hex>`.
fn correlation_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), &random[..8])
}

impl RemoteExecutor {
    pub fn new(session_id: &str, environment: Environment, width: u32, height: u32, timeout: Duration) -> Self {
        Self {
            session_id: session_id.to_string(),
            environment,
            width,
            height,
            timeout,
            channel: Mutex::new(Channel { tx: None, generation: 0 }),
            pending: Arc::new(Mutex::new(HashMap::new())),
            cache: Mutex::new(PushCache::default()),
        }
    }

    /// Attach a host connection; returns the generation to pass to
    /// [`RemoteExecutor::detach`]. Replaces any previous connection.
    pub async fn attach(&self, tx: mpsc::Sender<String>) -> u64 {
        let mut channel = self.channel.lock().await;
        channel.generation += 1;
        channel.tx = Some(tx);
        info!(session_id = %self.session_id, generation = channel.generation, "Execution host attached");
        channel.generation
    }

    /// Detach the connection of `generation`. A stale generation is ignored;
    /// otherwise every outstanding request is rejected with `ChannelClosed`.
    pub async fn detach(&self, generation: u64) {
        {
            let mut channel = self.channel.lock().await;
            if channel.generation != generation || channel.tx.is_none() {
                debug!(
                    session_id = %self.session_id,
                    generation,
                    current = channel.generation,
                    "Ignoring stale host detach"
                );
                return;
            }
            channel.tx = None;
        }
        info!(session_id = %self.session_id, generation, "Execution host detached");
        self.reject_all("execution host disconnected").await;
    }

    pub async fn is_attached(&self) -> bool {
        self.channel.lock().await.tx.is_some()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn reject_all(&self, reason: &str) {
        let drained: Vec<(String, oneshot::Sender<Result<Value>>)> = self.pending.lock().await.drain().collect();
        for (id, tx) in drained {
            debug!(session_id = %self.session_id, correlation_id = %id, "Rejecting pending request");
            let _ = tx.send(Err(Error::ChannelClosed(reason.to_string())));
        }
    }

    /// Route one inbound envelope from the host.
    pub async fn handle_inbound(&self, raw: &str) {
        let envelope: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    error = %e,
                    raw = %surfpilot_core::safe_truncate(raw, 200),
                    "Ignoring malformed host envelope"
                );
                return;
            }
        };

        match envelope.get("kind").and_then(|v| v.as_str()).unwrap_or("") {
            "action-response" => self.resolve(&envelope).await,
            "screenshot" => match envelope.get("data").and_then(|v| v.as_str()) {
                Some(data) if !data.is_empty() => {
                    self.cache.lock().await.screenshot = Some(data.to_string());
                }
                _ => debug!(session_id = %self.session_id, "Screenshot push without data"),
            },
            "url" => match envelope.get("url").and_then(|v| v.as_str()) {
                Some(url) => self.cache.lock().await.url = Some(url.to_string()),
                None => debug!(session_id = %self.session_id, "URL push without url"),
            },
            other => {
                warn!(session_id = %self.session_id, kind = %other, "Ignoring unrecognized host envelope");
            }
        }
    }

    async fn resolve(&self, envelope: &Value) {
        let Some(id) = envelope.get("id").and_then(|v| v.as_str()) else {
            warn!(session_id = %self.session_id, "Action response without id");
            return;
        };
        let Some(tx) = self.pending.lock().await.remove(id) else {
            debug!(session_id = %self.session_id, correlation_id = %id, "Late or unknown action response ignored");
            return;
        };

        let success = envelope.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        let outcome = if success {
            Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
        } else {
            let message = envelope
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("remote action failed")
                .to_string();
            Err(Error::ActionFailed(message))
        };
        let _ = tx.send(outcome);
    }

    /// Send one correlated request. With no host attached this is a no-op
    /// returning `Value::Null`.
    pub async fn request(&self, action: &str, params: Value) -> Result<Value> {
        let tx = self.channel.lock().await.tx.clone();
        let Some(tx) = tx else {
            debug!(session_id = %self.session_id, action, "No execution host attached, skipping");
            return Ok(Value::Null);
        };

        let (resp_tx, resp_rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending.lock().await;
            let mut id = correlation_id();
            while pending.contains_key(&id) {
                id = correlation_id();
            }
            pending.insert(id.clone(), resp_tx);
            id
        };

        let envelope = json!({
            "kind": "action-request",
            "action": action,
            "params": params,
            "id": id,
        });
        debug!(session_id = %self.session_id, correlation_id = %id, action, "Dispatching action request");

        if tx.send(envelope.to_string()).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::ChannelClosed(format!("host channel closed before sending {}", action)));
        }

        match tokio::time::timeout(self.timeout, resp_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ChannelClosed(format!("host channel closed while awaiting {}", action))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(
                    session_id = %self.session_id,
                    correlation_id = %id,
                    action,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Action request timed out"
                );
                Err(Error::Timeout(format!(
                    "{} got no response within {}ms",
                    action,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    async fn dispatch(&self, action: UiAction) -> Result<()> {
        self.request(action.name(), action.params()).await.map(|_| ())
    }
}

/// Pull a string out of a host result, which may be bare or wrapped as `{key: ...}`.
fn result_string(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Surface for RemoteExecutor {
    fn environment(&self) -> Environment {
        self.environment
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn click(&self, x: i64, y: i64, button: MouseButton) -> Result<()> {
        self.dispatch(UiAction::Click { x, y, button }).await
    }

    async fn double_click(&self, x: i64, y: i64) -> Result<()> {
        self.dispatch(UiAction::DoubleClick { x, y }).await
    }

    async fn move_pointer(&self, x: i64, y: i64) -> Result<()> {
        self.dispatch(UiAction::Move { x, y }).await
    }

    async fn drag(&self, path: &[Point]) -> Result<()> {
        validate_drag_path(path)?;
        self.dispatch(UiAction::Drag { path: path.to_vec() }).await
    }

    async fn scroll(&self, x: i64, y: i64, dx: i64, dy: i64) -> Result<()> {
        self.dispatch(UiAction::Scroll { x, y, dx, dy }).await
    }

    async fn keypress(&self, keys: &[String]) -> Result<()> {
        self.dispatch(UiAction::Keypress { keys: keys.to_vec() }).await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.dispatch(UiAction::Type { text: text.to_string() }).await
    }

    async fn wait(&self, ms: u64) -> Result<()> {
        self.dispatch(UiAction::Wait { ms }).await
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.dispatch(UiAction::Navigate { url: url.to_string() }).await
    }

    async fn back(&self) -> Result<()> {
        self.dispatch(UiAction::Back).await
    }

    async fn forward(&self) -> Result<()> {
        self.dispatch(UiAction::Forward).await
    }

    /// Falls back to the last pushed screenshot when the round trip fails or
    /// no host is attached.
    async fn screenshot(&self) -> Result<String> {
        match self.request("screenshot", json!({})).await {
            Ok(value) => match result_string(&value, "data") {
                Some(data) => {
                    self.cache.lock().await.screenshot = Some(data.clone());
                    Ok(data)
                }
                None => Ok(self.cache.lock().await.screenshot.clone().unwrap_or_default()),
            },
            Err(e) => match self.cache.lock().await.screenshot.clone() {
                Some(cached) => {
                    warn!(session_id = %self.session_id, error = %e, "Screenshot failed, using cached push");
                    Ok(cached)
                }
                None => Err(e),
            },
        }
    }

    async fn current_url(&self) -> Result<String> {
        match self.request("get_current_url", json!({})).await {
            Ok(value) => match result_string(&value, "url") {
                Some(url) => {
                    self.cache.lock().await.url = Some(url.clone());
                    Ok(url)
                }
                None => Ok(self.cache.lock().await.url.clone().unwrap_or_default()),
            },
            Err(e) => match self.cache.lock().await.url.clone() {
                Some(cached) => {
                    warn!(session_id = %self.session_id, error = %e, "URL query failed, using cached push");
                    Ok(cached)
                }
                None => Err(e),
            },
        }
    }

    async fn close(&self) -> Result<()> {
        self.channel.lock().await.tx = None;
        self.reject_all("executor closed").await;
        Ok(())
    }
}
