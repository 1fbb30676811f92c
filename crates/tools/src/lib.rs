pub mod blocklist;
pub mod browser;
pub mod local;
pub mod navigation;
pub mod registry;
pub mod remote;
pub mod surface;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use surfpilot_core::Result;

pub use blocklist::UrlBlocklist;
pub use local::{LocalExecutor, PageDriver};
pub use registry::ToolRegistry;
pub use remote::RemoteExecutor;
pub use surface::Surface;

/// What a function tool gets to work with.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub surface: Arc<dyn Surface>,
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value>;
}
