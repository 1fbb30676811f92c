use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use surfpilot_core::types::{PendingSafetyCheck, ToolCatalog, TranscriptItem, UiAction};
use surfpilot_core::{Error, Result};
use surfpilot_core::safe_truncate;
use tracing::{debug, error, info};

use crate::client::build_http_client;
use crate::Oracle;

/// Oracle backed by the OpenAI Responses API with the computer-use tool.
pub struct ResponsesOracle {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl ResponsesOracle {
    pub fn new(api_key: &str, api_base: Option<&str>, model: &str) -> Self {
        Self::new_with_proxy(api_key, api_base, model, None, None, &[])
    }

    pub fn new_with_proxy(
        api_key: &str,
        api_base: Option<&str>,
        model: &str,
        provider_proxy: Option<&str>,
        global_proxy: Option<&str>,
        no_proxy: &[String],
    ) -> Self {
        let resolved_base = api_base
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();
        let client = build_http_client(
            provider_proxy,
            global_proxy,
            no_proxy,
            &resolved_base,
            Duration::from_secs(120),
        );
        Self {
            client,
            api_key: api_key.to_string(),
            api_base: resolved_base,
            model: model.to_string(),
        }
    }

    fn build_request(&self, history: &[TranscriptItem], catalog: &ToolCatalog) -> Value {
        json!({
            "model": self.model,
            "input": build_input(history),
            "tools": build_tools(catalog),
            "truncation": "auto",
        })
    }

    async fn send_request(&self, body: &Value, items: usize) -> Result<Value> {
        let url = format!("{}/responses", self.api_base);
        info!(url = %url, model = %self.model, items, "Querying oracle");

        let request_body = serde_json::to_string(body)
            .map_err(|e| Error::OracleTransport(format!("Failed to serialize request: {}", e)))?;
        debug!(body_len = request_body.len(), "Request body prepared");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(request_body)
            .send()
            .await
            .map_err(|e| Error::OracleTransport(format!("Request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let body = safe_truncate(&raw_body, 1000);
            error!(status = %status, body = %body, "Oracle API error");
            return Err(Error::OracleTransport(format!("API error {}: {}", status, body)));
        }

        debug!(body_len = raw_body.len(), preview = %safe_truncate(&raw_body, 500), "Oracle raw response");

        serde_json::from_str(&raw_body).map_err(|e| {
            Error::OracleTransport(format!(
                "Failed to parse response: {}. Body: {}",
                e,
                safe_truncate(&raw_body, 500)
            ))
        })
    }
}

/// The computer tool only knows the pointer/keyboard primitives; fields it
/// does not define are dropped when echoing an action back.
fn action_to_wire(action: &UiAction) -> Value {
    let mut value = serde_json::to_value(action).unwrap_or(Value::Null);
    if let (UiAction::Wait { .. }, Some(map)) = (action, value.as_object_mut()) {
        map.remove("ms");
    }
    value
}

fn safety_checks_to_wire(checks: &[PendingSafetyCheck]) -> Value {
    Value::Array(
        checks
            .iter()
            .map(|c| json!({"id": c.id, "code": c.code, "message": c.message}))
            .collect(),
    )
}

/// Map conversation history to Responses API input items.
pub(crate) fn build_input(history: &[TranscriptItem]) -> Vec<Value> {
    history
        .iter()
        .map(|item| match item {
            TranscriptItem::UserMessage { text } => json!({"role": "user", "content": text}),
            TranscriptItem::AssistantMessage { text } => json!({"role": "assistant", "content": text}),
            TranscriptItem::ToolCall { name, arguments, call_id } => json!({
                "type": "function_call",
                "call_id": call_id,
                "name": name,
                "arguments": arguments,
            }),
            TranscriptItem::UiActionCall { action, call_id, pending_safety_checks } => json!({
                "type": "computer_call",
                "call_id": call_id,
                "action": action_to_wire(action),
                "pending_safety_checks": safety_checks_to_wire(pending_safety_checks),
                "status": "completed",
            }),
            TranscriptItem::ToolResult { call_id, output } => json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }),
            TranscriptItem::UiActionResult {
                call_id,
                screenshot,
                current_url,
                acknowledged_safety_checks,
            } => {
                let mut output = json!({
                    "type": "input_image",
                    "image_url": format!("data:image/png;base64,{}", screenshot),
                });
                if let Some(url) = current_url {
                    output["current_url"] = json!(url);
                }
                let mut out = json!({
                    "type": "computer_call_output",
                    "call_id": call_id,
                    "output": output,
                });
                if !acknowledged_safety_checks.is_empty() {
                    out["acknowledged_safety_checks"] = safety_checks_to_wire(acknowledged_safety_checks);
                }
                out
            }
            TranscriptItem::Reasoning { raw } => raw.clone(),
        })
        .collect()
}

pub(crate) fn build_tools(catalog: &ToolCatalog) -> Vec<Value> {
    let mut tools = vec![json!({
        "type": "computer_use_preview",
        "display_width": catalog.display_width,
        "display_height": catalog.display_height,
        "environment": catalog.environment.as_str(),
    })];
    tools.extend(catalog.functions.iter().cloned());
    tools
}

fn parse_safety_checks(value: Option<&Value>) -> Vec<PendingSafetyCheck> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|c| serde_json::from_value::<PendingSafetyCheck>(c.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn str_field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// Map the `output` array of a Responses API body to transcript items.
pub(crate) fn parse_output(body: &Value) -> Result<Vec<TranscriptItem>> {
    let output = body
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::OracleTransport("Response has no output array".to_string()))?;

    let mut items = Vec::with_capacity(output.len());
    for item in output {
        match str_field(item, "type") {
            "message" => {
                let text: String = item
                    .get("content")
                    .and_then(|v| v.as_array())
                    .map(|parts| {
                        parts
                            .iter()
                            .filter(|p| str_field(p, "type") == "output_text")
                            .map(|p| str_field(p, "text"))
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .unwrap_or_default();
                items.push(TranscriptItem::AssistantMessage { text });
            }
            "function_call" => {
                let arguments = match item.get("arguments") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => "{}".to_string(),
                };
                items.push(TranscriptItem::ToolCall {
                    name: str_field(item, "name").to_string(),
                    arguments,
                    call_id: str_field(item, "call_id").to_string(),
                });
            }
            "computer_call" => {
                let raw_action = item.get("action").cloned().unwrap_or(Value::Null);
                let action: UiAction = serde_json::from_value(raw_action.clone()).map_err(|_| {
                    let kind = raw_action
                        .get("type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("<missing>");
                    Error::UnrecognizedAction(kind.to_string())
                })?;
                items.push(TranscriptItem::UiActionCall {
                    action,
                    call_id: str_field(item, "call_id").to_string(),
                    pending_safety_checks: parse_safety_checks(item.get("pending_safety_checks")),
                });
            }
            "reasoning" => items.push(TranscriptItem::Reasoning { raw: item.clone() }),
            other => debug!(item_type = %other, "Skipping unhandled oracle output item"),
        }
    }
    Ok(items)
}

#[async_trait]
impl Oracle for ResponsesOracle {
    async fn query(&self, history: &[TranscriptItem], catalog: &ToolCatalog) -> Result<Vec<TranscriptItem>> {
        let body = self.build_request(history, catalog);
        let response = self.send_request(&body, history.len()).await?;
        let items = parse_output(&response)?;
        info!(items = items.len(), "Oracle responded");
        Ok(items)
    }
}
