use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use surfpilot_core::Result;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::cdp::CdpClient;
use crate::local::PageDriver;

const LOAD_WAIT: Duration = Duration::from_secs(10);

/// A launched browser's page, driven over CDP. Owns the browser process.
pub struct CdpPage {
    cdp: CdpClient,
    process: Mutex<Option<Child>>,
}

impl CdpPage {
    pub fn new(cdp: CdpClient, process: Child) -> Self {
        Self {
            cdp,
            process: Mutex::new(Some(process)),
        }
    }
}

impl std::fmt::Debug for CdpPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpPage").finish_non_exhaustive()
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn mouse_event(&self, kind: &str, x: f64, y: f64, button: &str, click_count: i32) -> Result<()> {
        self.cdp.dispatch_mouse_event(kind, x, y, button, click_count).await
    }

    async fn mouse_wheel(&self, x: f64, y: f64, dx: f64, dy: f64) -> Result<()> {
        self.cdp.dispatch_mouse_wheel(x, y, dx, dy).await
    }

    async fn key_event(&self, kind: &str, key: &str, modifiers: i32) -> Result<()> {
        self.cdp.dispatch_key_event(kind, key, modifiers).await
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.cdp.insert_text(text).await
    }

    /// Navigate and wait (bounded) for the load event.
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut loaded = self.cdp.subscribe_event("Page.loadEventFired").await;
        self.cdp.navigate(url).await?;
        if tokio::time::timeout(LOAD_WAIT, loaded.recv()).await.is_err() {
            warn!(url = %url, "Page load event not seen, continuing");
        }
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.cdp.evaluate_js(expression).await
    }

    async fn screenshot(&self) -> Result<String> {
        self.cdp.screenshot().await
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.cdp.close_browser().await {
            debug!(error = %e, "Browser.close failed, killing process");
        }
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.process.try_lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}
