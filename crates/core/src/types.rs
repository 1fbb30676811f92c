use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Mouse buttons the oracle may ask for.
///
/// Drivers only know a three-button mouse, so `wheel` becomes `middle` and
/// the navigation buttons collapse onto `left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Wheel,
    Back,
    Forward,
}

impl MouseButton {
    pub fn driver_button(&self) -> &'static str {
        match self {
            MouseButton::Left | MouseButton::Back | MouseButton::Forward => "left",
            MouseButton::Right => "right",
            MouseButton::Wheel => "middle",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Wheel => "wheel",
            MouseButton::Back => "back",
            MouseButton::Forward => "forward",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

fn default_wait_ms() -> u64 {
    2000
}

/// A single UI primitive requested by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiAction {
    Click {
        x: i64,
        y: i64,
        #[serde(default)]
        button: MouseButton,
    },
    DoubleClick {
        x: i64,
        y: i64,
    },
    Move {
        x: i64,
        y: i64,
    },
    Drag {
        path: Vec<Point>,
    },
    Scroll {
        x: i64,
        y: i64,
        #[serde(rename = "scroll_x", default)]
        dx: i64,
        #[serde(rename = "scroll_y", default)]
        dy: i64,
    },
    Keypress {
        keys: Vec<String>,
    },
    Type {
        text: String,
    },
    Wait {
        #[serde(default = "default_wait_ms")]
        ms: u64,
    },
    Navigate {
        url: String,
    },
    Back,
    Forward,
    Screenshot,
    GetCurrentUrl,
}

impl UiAction {
    /// Wire name of the action, identical to the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            UiAction::Click { .. } => "click",
            UiAction::DoubleClick { .. } => "double_click",
            UiAction::Move { .. } => "move",
            UiAction::Drag { .. } => "drag",
            UiAction::Scroll { .. } => "scroll",
            UiAction::Keypress { .. } => "keypress",
            UiAction::Type { .. } => "type",
            UiAction::Wait { .. } => "wait",
            UiAction::Navigate { .. } => "navigate",
            UiAction::Back => "back",
            UiAction::Forward => "forward",
            UiAction::Screenshot => "screenshot",
            UiAction::GetCurrentUrl => "get_current_url",
        }
    }

    /// Arguments of the action without the `type` tag.
    pub fn params(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("type");
                Value::Object(map)
            }
            _ => Value::Object(serde_json::Map::new()),
        }
    }
}

impl fmt::Display for UiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiAction::Click { x, y, button } => {
                write!(f, "click({}, {}, {})", x, y, button.as_str())
            }
            UiAction::DoubleClick { x, y } => write!(f, "double_click({}, {})", x, y),
            UiAction::Move { x, y } => write!(f, "move({}, {})", x, y),
            UiAction::Drag { path } => {
                let points: Vec<String> = path.iter().map(|p| format!("({}, {})", p.x, p.y)).collect();
                write!(f, "drag[{}]", points.join(" -> "))
            }
            UiAction::Scroll { x, y, dx, dy } => {
                write!(f, "scroll({}, {}) by ({}, {})", x, y, dx, dy)
            }
            UiAction::Keypress { keys } => write!(f, "keypress({})", keys.join("+")),
            UiAction::Type { text } => write!(f, "type({:?})", text),
            UiAction::Wait { ms } => write!(f, "wait({}ms)", ms),
            UiAction::Navigate { url } => write!(f, "navigate({})", url),
            UiAction::Back => write!(f, "back"),
            UiAction::Forward => write!(f, "forward"),
            UiAction::Screenshot => write!(f, "screenshot"),
            UiAction::GetCurrentUrl => write!(f, "get_current_url"),
        }
    }
}

/// A safety check the oracle attaches to an action call; it must be
/// acknowledged before the result of that action is reported back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSafetyCheck {
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptItem {
    UserMessage {
        text: String,
    },
    AssistantMessage {
        text: String,
    },
    ToolCall {
        name: String,
        /// Raw JSON arguments as produced by the oracle.
        arguments: String,
        call_id: String,
    },
    UiActionCall {
        action: UiAction,
        call_id: String,
        #[serde(default)]
        pending_safety_checks: Vec<PendingSafetyCheck>,
    },
    ToolResult {
        call_id: String,
        output: String,
    },
    UiActionResult {
        call_id: String,
        /// Base64 PNG; empty when no surface could produce one.
        screenshot: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_url: Option<String>,
        #[serde(default)]
        acknowledged_safety_checks: Vec<PendingSafetyCheck>,
    },
    /// Opaque oracle reasoning. Replayed verbatim ahead of the call it
    /// produced.
    Reasoning {
        raw: serde_json::Value,
    },
}

impl TranscriptItem {
    pub fn user(text: &str) -> Self {
        TranscriptItem::UserMessage { text: text.to_string() }
    }

    pub fn assistant(text: &str) -> Self {
        TranscriptItem::AssistantMessage { text: text.to_string() }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            TranscriptItem::ToolCall { call_id, .. }
            | TranscriptItem::UiActionCall { call_id, .. }
            | TranscriptItem::ToolResult { call_id, .. }
            | TranscriptItem::UiActionResult { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    pub fn is_assistant_message(&self) -> bool {
        matches!(self, TranscriptItem::AssistantMessage { .. })
    }

    /// Copy with screenshot payloads replaced by their size, for log and
    /// observer output.
    pub fn redacted(&self) -> Self {
        match self {
            TranscriptItem::UiActionResult {
                call_id,
                screenshot,
                current_url,
                acknowledged_safety_checks,
            } => TranscriptItem::UiActionResult {
                call_id: call_id.clone(),
                screenshot: format!("<{} bytes>", screenshot.len()),
                current_url: current_url.clone(),
                acknowledged_safety_checks: acknowledged_safety_checks.clone(),
            },
            other => other.clone(),
        }
    }
}

/// Kind of machine the surface represents, as advertised to the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Browser,
    Mac,
    Windows,
    Ubuntu,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Browser => "browser",
            Environment::Mac => "mac",
            Environment::Windows => "windows",
            Environment::Ubuntu => "ubuntu",
        }
    }
}

/// Everything the oracle is told about what it may call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCatalog {
    /// Function tool schemas: `{type: "function", name, description, parameters}`.
    pub functions: Vec<Value>,
    pub display_width: u32,
    pub display_height: u32,
    pub environment: Environment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_button_maps_to_three_button_driver() {
        assert_eq!(MouseButton::Left.driver_button(), "left");
        assert_eq!(MouseButton::Right.driver_button(), "right");
        assert_eq!(MouseButton::Wheel.driver_button(), "middle");
        assert_eq!(MouseButton::Back.driver_button(), "left");
        assert_eq!(MouseButton::Forward.driver_button(), "left");
    }

    #[test]
    fn test_action_parses_oracle_shape() {
        let click: UiAction = serde_json::from_value(json!({"type": "click", "x": 100, "y": 50, "button": "wheel"})).unwrap();
        assert_eq!(click, UiAction::Click { x: 100, y: 50, button: MouseButton::Wheel });

        let scroll: UiAction = serde_json::from_value(json!({"type": "scroll", "x": 1, "y": 2, "scroll_x": 0, "scroll_y": 300})).unwrap();
        assert_eq!(scroll, UiAction::Scroll { x: 1, y: 2, dx: 0, dy: 300 });

        let back: UiAction = serde_json::from_value(json!({"type": "back"})).unwrap();
        assert_eq!(back, UiAction::Back);
    }

    #[test]
    fn test_wait_defaults_to_two_seconds() {
        let wait: UiAction = serde_json::from_value(json!({"type": "wait"})).unwrap();
        assert_eq!(wait, UiAction::Wait { ms: 2000 });
    }

    #[test]
    fn test_click_button_defaults_to_left() {
        let click: UiAction = serde_json::from_value(json!({"type": "click", "x": 3, "y": 4})).unwrap();
        assert_eq!(click, UiAction::Click { x: 3, y: 4, button: MouseButton::Left });
    }

    #[test]
    fn test_unknown_action_type_is_rejected() {
        let parsed = serde_json::from_value::<UiAction>(json!({"type": "teleport", "x": 1}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_params_strip_type_tag() {
        let action = UiAction::Navigate { url: "https://example.com".into() };
        assert_eq!(action.name(), "navigate");
        assert_eq!(action.params(), json!({"url": "https://example.com"}));
        assert_eq!(UiAction::Back.params(), json!({}));
    }

    #[test]
    fn test_display_is_one_line() {
        let drag = UiAction::Drag { path: vec![Point::new(0, 0), Point::new(10, 20)] };
        assert_eq!(drag.to_string(), "drag[(0, 0) -> (10, 20)]");
        let click = UiAction::Click { x: 100, y: 50, button: MouseButton::Left };
        assert_eq!(click.to_string(), "click(100, 50, left)");
    }

    #[test]
    fn test_redacted_hides_screenshot() {
        let item = TranscriptItem::UiActionResult {
            call_id: "c1".into(),
            screenshot: "aGVsbG8=".into(),
            current_url: None,
            acknowledged_safety_checks: vec![],
        };
        match item.redacted() {
            TranscriptItem::UiActionResult { screenshot, .. } => assert_eq!(screenshot, "<8 bytes>"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
