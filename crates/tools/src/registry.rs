use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use surfpilot_core::{Error, Result};
use tracing::{debug, warn};

use crate::navigation::{BackTool, CurrentUrlTool, GotoTool};
use crate::{Tool, ToolContext};

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GotoTool));
        registry.register(Arc::new(BackTool));
        registry.register(Arc::new(CurrentUrlTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = schema.name, "Registering tool");
        self.tools.insert(schema.name.to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Function schemas in Responses API form, sorted by name.
    pub fn get_tool_schemas(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                let schema = tool.schema();
                json!({
                    "type": "function",
                    "name": schema.name,
                    "description": schema.description,
                    "parameters": schema.parameters
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, ctx: ToolContext, params: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;

        if let Err(e) = tool.validate(&params) {
            warn!(tool = name, error = %e, "Tool validation failed");
            return Err(e);
        }

        tool.execute(ctx, params).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a tool outcome as the string fed back to the oracle: strings
/// verbatim, other values as JSON, failures as `error: <message>`.
pub fn to_output(result: &Result<Value>) -> String {
    match result {
        Ok(Value::String(s)) => s.clone(),
        Ok(Value::Null) => String::new(),
        Ok(other) => other.to_string(),
        Err(e) => format!("error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::tests::RecordingDriver;
    use crate::LocalExecutor;
    use surfpilot_core::types::Environment;

    fn ctx() -> (Arc<RecordingDriver>, ToolContext) {
        let driver = Arc::new(RecordingDriver::default());
        let surface = Arc::new(LocalExecutor::new(driver.clone(), Environment::Browser, 1024, 768));
        (driver, ToolContext { session_id: "s1".to_string(), surface })
    }

    #[test]
    fn test_defaults_are_sorted_function_schemas() {
        let registry = ToolRegistry::with_defaults();
        let schemas = registry.get_tool_schemas();
        let names: Vec<&str> = schemas.iter().filter_map(|s| s["name"].as_str()).collect();
        assert_eq!(names, vec!["back", "current_url", "goto"]);
        assert!(schemas.iter().all(|s| s["type"] == "function"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (_driver, ctx) = ctx();
        let err = ToolRegistry::with_defaults()
            .execute("teleport", ctx, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTool(ref n) if n == "teleport"));
        assert_eq!(to_output(&Err(err)), "error: Unknown tool: teleport");
    }

    #[tokio::test]
    async fn test_goto_navigates_surface() {
        let (driver, ctx) = ctx();
        let registry = ToolRegistry::with_defaults();
        let out = registry
            .execute("goto", ctx.clone(), json!({"url": "https://example.com/"}))
            .await;
        assert_eq!(to_output(&out), "Navigated to https://example.com/");
        assert!(driver.calls().contains(&"navigate https://example.com/".to_string()));

        let url = registry.execute("current_url", ctx, json!({})).await;
        assert_eq!(to_output(&url), "https://example.com/");
    }

    #[tokio::test]
    async fn test_validation_failure_is_error() {
        let (driver, ctx) = ctx();
        let out = ToolRegistry::with_defaults().execute("goto", ctx, json!({})).await;
        assert!(to_output(&out).starts_with("error: Invalid argument"));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_output_sentinel_for_values() {
        assert_eq!(to_output(&Ok(json!({"a": 1}))), "{\"a\":1}");
        assert_eq!(to_output(&Ok(Value::Null)), "");
    }
}
