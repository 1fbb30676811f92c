//! In-process executor that drives a live page directly.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use surfpilot_core::types::{Environment, MouseButton, Point};
use surfpilot_core::{Error, Result};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::surface::{validate_drag_path, Surface};

/// Removes `target="_blank"` so link clicks stay in the current tab.
const NEUTRALIZE_NEW_TAB_JS: &str =
    "document.querySelectorAll('a[target=\"_blank\"]').forEach(a => a.removeAttribute('target'))";

/// CDP modifier bits.
const MOD_ALT: i32 = 1;
const MOD_CTRL: i32 = 2;
const MOD_META: i32 = 4;
const MOD_SHIFT: i32 = 8;

/// Low-level page primitives the local executor is built on.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// `kind` is one of `mouseMoved`, `mousePressed`, `mouseReleased`.
    async fn mouse_event(&self, kind: &str, x: f64, y: f64, button: &str, click_count: i32) -> Result<()>;
    async fn mouse_wheel(&self, x: f64, y: f64, dx: f64, dy: f64) -> Result<()>;
    /// `kind` is `keyDown` or `keyUp`.
    async fn key_event(&self, kind: &str, key: &str, modifiers: i32) -> Result<()>;
    async fn insert_text(&self, text: &str) -> Result<()>;
    async fn navigate(&self, url: &str) -> Result<()>;
    /// Evaluate an expression and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value>;
    async fn screenshot(&self) -> Result<String>;
    async fn close(&self) -> Result<()>;
}

/// Translate an oracle key token into a driver key name.
pub fn map_key(token: &str) -> String {
    let upper = token.to_uppercase();
    if upper.contains("ENTER") || upper == "RETURN" {
        return "Enter".to_string();
    }
    if upper.contains("SPACE") {
        return " ".to_string();
    }
    match upper.as_str() {
        "CTRL" | "CONTROL" => "Control",
        "ALT" | "OPTION" => "Alt",
        "SHIFT" => "Shift",
        "CMD" | "META" | "SUPER" | "WIN" => "Meta",
        "ESC" | "ESCAPE" => "Escape",
        "TAB" => "Tab",
        "BACKSPACE" => "Backspace",
        "DELETE" | "DEL" => "Delete",
        "HOME" => "Home",
        "END" => "End",
        "PAGEUP" => "PageUp",
        "PAGEDOWN" => "PageDown",
        "UP" | "ARROWUP" => "ArrowUp",
        "DOWN" | "ARROWDOWN" => "ArrowDown",
        "LEFT" | "ARROWLEFT" => "ArrowLeft",
        "RIGHT" | "ARROWRIGHT" => "ArrowRight",
        _ => return token.to_string(),
    }
    .to_string()
}

fn modifier_bit(key: &str) -> i32 {
    match key {
        "Alt" => MOD_ALT,
        "Control" => MOD_CTRL,
        "Meta" => MOD_META,
        "Shift" => MOD_SHIFT,
        _ => 0,
    }
}

pub struct LocalExecutor {
    driver: RwLock<Option<Arc<dyn PageDriver>>>,
    environment: Environment,
    width: u32,
    height: u32,
}

impl LocalExecutor {
    pub fn new(driver: Arc<dyn PageDriver>, environment: Environment, width: u32, height: u32) -> Self {
        Self {
            driver: RwLock::new(Some(driver)),
            environment,
            width,
            height,
        }
    }

    async fn driver(&self) -> Result<Arc<dyn PageDriver>> {
        self.driver
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::NotReady("no page attached to local executor".to_string()))
    }
}

#[async_trait]
impl Surface for LocalExecutor {
    fn environment(&self) -> Environment {
        self.environment
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn click(&self, x: i64, y: i64, button: MouseButton) -> Result<()> {
        let driver = self.driver().await?;
        if let Err(e) = driver.evaluate(NEUTRALIZE_NEW_TAB_JS).await {
            warn!(error = %e, "Failed to neutralize new-tab links before click");
        }
        let (x, y) = (x as f64, y as f64);
        let button = button.driver_button();
        driver.mouse_event("mouseMoved", x, y, "none", 0).await?;
        driver.mouse_event("mousePressed", x, y, button, 1).await?;
        driver.mouse_event("mouseReleased", x, y, button, 1).await
    }

    async fn double_click(&self, x: i64, y: i64) -> Result<()> {
        let driver = self.driver().await?;
        let (x, y) = (x as f64, y as f64);
        driver.mouse_event("mouseMoved", x, y, "none", 0).await?;
        for count in 1..=2 {
            driver.mouse_event("mousePressed", x, y, "left", count).await?;
            driver.mouse_event("mouseReleased", x, y, "left", count).await?;
        }
        Ok(())
    }

    async fn move_pointer(&self, x: i64, y: i64) -> Result<()> {
        let driver = self.driver().await?;
        driver.mouse_event("mouseMoved", x as f64, y as f64, "none", 0).await
    }

    async fn drag(&self, path: &[Point]) -> Result<()> {
        validate_drag_path(path)?;
        let driver = self.driver().await?;
        let (first, rest) = match path.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };
        let (fx, fy) = (first.x as f64, first.y as f64);
        driver.mouse_event("mouseMoved", fx, fy, "none", 0).await?;
        driver.mouse_event("mousePressed", fx, fy, "left", 1).await?;
        for p in rest {
            driver.mouse_event("mouseMoved", p.x as f64, p.y as f64, "left", 0).await?;
        }
        let last = rest.last().unwrap_or(first);
        driver.mouse_event("mouseReleased", last.x as f64, last.y as f64, "left", 1).await
    }

    async fn scroll(&self, x: i64, y: i64, dx: i64, dy: i64) -> Result<()> {
        let driver = self.driver().await?;
        driver.mouse_event("mouseMoved", x as f64, y as f64, "none", 0).await?;
        driver.mouse_wheel(x as f64, y as f64, dx as f64, dy as f64).await
    }

    async fn keypress(&self, keys: &[String]) -> Result<()> {
        let driver = self.driver().await?;
        let mapped: Vec<String> = keys.iter().map(|k| map_key(k)).collect();
        let mut modifiers = 0;
        for key in &mapped {
            modifiers |= modifier_bit(key);
            driver.key_event("keyDown", key, modifiers).await?;
        }
        for key in mapped.iter().rev() {
            driver.key_event("keyUp", key, modifiers).await?;
            modifiers &= !modifier_bit(key);
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.driver().await?.insert_text(text).await
    }

    async fn wait(&self, ms: u64) -> Result<()> {
        self.driver().await?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.driver().await?.navigate(url).await
    }

    async fn back(&self) -> Result<()> {
        self.driver().await?.evaluate("history.back()").await.map(|_| ())
    }

    async fn forward(&self) -> Result<()> {
        self.driver().await?.evaluate("history.forward()").await.map(|_| ())
    }

    async fn screenshot(&self) -> Result<String> {
        self.driver().await?.screenshot().await
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.driver().await?.evaluate("location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close(&self) -> Result<()> {
        let driver = self.driver.write().await.take();
        match driver {
            Some(driver) => driver.close().await,
            None => {
                debug!("Local executor already closed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every driver call as a compact string.
    #[derive(Default)]
    pub(crate) struct RecordingDriver {
        pub calls: Mutex<Vec<String>>,
        pub url: Mutex<String>,
    }

    impl RecordingDriver {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageDriver for RecordingDriver {
        async fn mouse_event(&self, kind: &str, x: f64, y: f64, button: &str, click_count: i32) -> Result<()> {
            self.record(format!("{} {},{} {} {}", kind, x, y, button, click_count));
            Ok(())
        }
        async fn mouse_wheel(&self, x: f64, y: f64, dx: f64, dy: f64) -> Result<()> {
            self.record(format!("wheel {},{} {},{}", x, y, dx, dy));
            Ok(())
        }
        async fn key_event(&self, kind: &str, key: &str, modifiers: i32) -> Result<()> {
            self.record(format!("{} {:?} {}", kind, key, modifiers));
            Ok(())
        }
        async fn insert_text(&self, text: &str) -> Result<()> {
            self.record(format!("text {}", text));
            Ok(())
        }
        async fn navigate(&self, url: &str) -> Result<()> {
            *self.url.lock().unwrap() = url.to_string();
            self.record(format!("navigate {}", url));
            Ok(())
        }
        async fn evaluate(&self, expression: &str) -> Result<Value> {
            self.record(format!("eval {}", expression));
            if expression == "location.href" {
                return Ok(Value::String(self.url.lock().unwrap().clone()));
            }
            Ok(Value::Null)
        }
        async fn screenshot(&self) -> Result<String> {
            self.record("screenshot".to_string());
            Ok("iVBORw0KGgo=".to_string())
        }
        async fn close(&self) -> Result<()> {
            self.record("close".to_string());
            Ok(())
        }
    }

    fn executor() -> (Arc<RecordingDriver>, LocalExecutor) {
        let driver = Arc::new(RecordingDriver::default());
        let exec = LocalExecutor::new(driver.clone(), Environment::Browser, 1024, 768);
        (driver, exec)
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(map_key("ENTER"), "Enter");
        assert_eq!(map_key("KP_ENTER"), "Enter");
        assert_eq!(map_key("SPACE"), " ");
        assert_eq!(map_key("ctrl"), "Control");
        assert_eq!(map_key("ArrowLeft"), "ArrowLeft");
        assert_eq!(map_key("a"), "a");
    }

    #[tokio::test]
    async fn test_click_neutralizes_new_tab_links_first() {
        let (driver, exec) = executor();
        exec.click(100, 50, MouseButton::Wheel).await.unwrap();
        let calls = driver.calls();
        assert!(calls[0].starts_with("eval document.querySelectorAll"));
        assert_eq!(calls[2], "mousePressed 100,50 middle 1");
        assert_eq!(calls[3], "mouseReleased 100,50 middle 1");
    }

    #[tokio::test]
    async fn test_back_button_clicks_left() {
        let (driver, exec) = executor();
        exec.click(1, 2, MouseButton::Back).await.unwrap();
        assert!(driver.calls().contains(&"mousePressed 1,2 left 1".to_string()));
    }

    #[tokio::test]
    async fn test_short_drag_never_reaches_driver() {
        let (driver, exec) = executor();
        let err = exec.drag(&[Point::new(5, 5)]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_drag_presses_moves_releases() {
        let (driver, exec) = executor();
        exec.drag(&[Point::new(0, 0), Point::new(5, 5), Point::new(10, 10)]).await.unwrap();
        assert_eq!(
            driver.calls(),
            vec![
                "mouseMoved 0,0 none 0",
                "mousePressed 0,0 left 1",
                "mouseMoved 5,5 left 0",
                "mouseMoved 10,10 left 0",
                "mouseReleased 10,10 left 1",
            ]
        );
    }

    #[tokio::test]
    async fn test_keypress_chord_carries_modifiers() {
        let (driver, exec) = executor();
        exec.keypress(&["CTRL".to_string(), "a".to_string()]).await.unwrap();
        assert_eq!(
            driver.calls(),
            vec![
                "keyDown \"Control\" 2",
                "keyDown \"a\" 2",
                "keyUp \"a\" 2",
                "keyUp \"Control\" 2",
            ]
        );
    }

    #[tokio::test]
    async fn test_current_url_reads_location() {
        let (_driver, exec) = executor();
        exec.navigate("https://example.com/").await.unwrap();
        assert_eq!(exec.current_url().await.unwrap(), "https://example.com/");
    }

    #[tokio::test]
    async fn test_missing_driver_is_not_ready() {
        let (_driver, exec) = executor();
        exec.close().await.unwrap();
        assert!(matches!(exec.screenshot().await, Err(Error::NotReady(_))));
        assert!(matches!(exec.click(1, 1, MouseButton::Left).await, Err(Error::NotReady(_))));
        assert!(matches!(exec.wait(10).await, Err(Error::NotReady(_))));
    }

    #[tokio::test]
    async fn test_close_releases_driver() {
        let (driver, exec) = executor();
        exec.close().await.unwrap();
        assert_eq!(driver.calls(), vec!["close"]);
        assert!(matches!(exec.navigate("https://a.b").await, Err(Error::NotReady(_))));
        exec.close().await.unwrap();
    }
}
