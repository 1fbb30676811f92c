//! Function tools that let the oracle steer the browser by name instead of
//! by pixel.

use async_trait::async_trait;
use serde_json::{json, Value};
use surfpilot_core::{Error, Result};

use crate::{Tool, ToolContext, ToolSchema};

pub struct GotoTool;

#[async_trait]
impl Tool for GotoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "goto",
            description: "Go directly to a URL in the current tab.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Absolute URL to open"}
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        match params.get("url").and_then(|v| v.as_str()) {
            Some(url) if !url.trim().is_empty() => Ok(()),
            _ => Err(Error::InvalidArgument("goto requires a non-empty 'url'".to_string())),
        }
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let url = params.get("url").and_then(|v| v.as_str()).unwrap_or_default();
        ctx.surface.navigate(url).await?;
        Ok(json!(format!("Navigated to {}", url)))
    }
}

pub struct BackTool;

#[async_trait]
impl Tool for BackTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "back",
            description: "Go back to the previous page.",
            parameters: json!({"type": "object", "properties": {}, "additionalProperties": false}),
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, _params: Value) -> Result<Value> {
        ctx.surface.back().await?;
        Ok(json!("Went back"))
    }
}

pub struct CurrentUrlTool;

#[async_trait]
impl Tool for CurrentUrlTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "current_url",
            description: "Return the URL of the current page.",
            parameters: json!({"type": "object", "properties": {}, "additionalProperties": false}),
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, _params: Value) -> Result<Value> {
        Ok(json!(ctx.surface.current_url().await?))
    }
}
