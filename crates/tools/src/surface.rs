use async_trait::async_trait;
use surfpilot_core::types::{Environment, MouseButton, Point, UiAction};
use surfpilot_core::{Error, Result};

/// A controllable browser: UI primitives plus screenshot and location
/// queries. Implemented in-process by [`crate::LocalExecutor`] and over a
/// duplex channel by [`crate::RemoteExecutor`].
#[async_trait]
pub trait Surface: Send + Sync {
    fn environment(&self) -> Environment;

    /// Display size in pixels, `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    async fn click(&self, x: i64, y: i64, button: MouseButton) -> Result<()>;
    async fn double_click(&self, x: i64, y: i64) -> Result<()>;
    async fn move_pointer(&self, x: i64, y: i64) -> Result<()>;
    async fn drag(&self, path: &[Point]) -> Result<()>;
    async fn scroll(&self, x: i64, y: i64, dx: i64, dy: i64) -> Result<()>;
    async fn keypress(&self, keys: &[String]) -> Result<()>;
    async fn type_text(&self, text: &str) -> Result<()>;
    async fn wait(&self, ms: u64) -> Result<()>;
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn back(&self) -> Result<()>;
    async fn forward(&self) -> Result<()>;

    /// Base64-encoded PNG of the current viewport.
    async fn screenshot(&self) -> Result<String>;
    async fn current_url(&self) -> Result<String>;

    /// Release the underlying driver or channel.
    async fn close(&self) -> Result<()>;
}

pub(crate) fn validate_drag_path(path: &[Point]) -> Result<()> {
    if path.len() < 2 {
        return Err(Error::InvalidArgument(format!(
            "drag path needs at least 2 points, got {}",
            path.len()
        )));
    }
    Ok(())
}

/// Run one [`UiAction`] against a surface.
pub async fn perform(surface: &dyn Surface, action: &UiAction) -> Result<()> {
    match action {
        UiAction::Click { x, y, button } => surface.click(*x, *y, *button).await,
        UiAction::DoubleClick { x, y } => surface.double_click(*x, *y).await,
        UiAction::Move { x, y } => surface.move_pointer(*x, *y).await,
        UiAction::Drag { path } => surface.drag(path).await,
        UiAction::Scroll { x, y, dx, dy } => surface.scroll(*x, *y, *dx, *dy).await,
        UiAction::Keypress { keys } => surface.keypress(keys).await,
        UiAction::Type { text } => surface.type_text(text).await,
        UiAction::Wait { ms } => surface.wait(*ms).await,
        UiAction::Navigate { url } => surface.navigate(url).await,
        UiAction::Back => surface.back().await,
        UiAction::Forward => surface.forward().await,
        // The loop captures a screenshot and location after every action anyway.
        UiAction::Screenshot => surface.screenshot().await.map(|_| ()),
        UiAction::GetCurrentUrl => surface.current_url().await.map(|_| ()),
    }
}
