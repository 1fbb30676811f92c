use serde::{Deserialize, Serialize};

use crate::types::TranscriptItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Action,
    Thinking,
    Complete,
    Error,
    Interrupted,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Action => "action",
            NotificationKind::Thinking => "thinking",
            NotificationKind::Complete => "complete",
            NotificationKind::Error => "error",
            NotificationKind::Interrupted => "interrupted",
        }
    }

    /// Whether this kind ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationKind::Complete | NotificationKind::Error | NotificationKind::Interrupted
        )
    }
}

/// Human-readable progress event emitted while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub text: String,
    pub timestamp_ms: i64,
}

impl Notification {
    pub fn new(kind: NotificationKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Completed,
    Interrupted,
    Failed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Completed => "completed",
            TurnStatus::Interrupted => "interrupted",
            TurnStatus::Failed => "failed",
        }
    }
}

/// Result of one turn: the items it appended and how it ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub items: Vec<TranscriptItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn completed(items: Vec<TranscriptItem>) -> Self {
        Self { status: TurnStatus::Completed, items, error: None }
    }

    pub fn interrupted(items: Vec<TranscriptItem>) -> Self {
        Self { status: TurnStatus::Interrupted, items, error: None }
    }

    pub fn failed(items: Vec<TranscriptItem>, error: String) -> Self {
        Self { status: TurnStatus::Failed, items, error: Some(error) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_shape() {
        let n = Notification::new(NotificationKind::Thinking, "looking");
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["kind"], "thinking");
        assert_eq!(v["text"], "looking");
        assert!(v["timestamp_ms"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(NotificationKind::Complete.is_terminal());
        assert!(NotificationKind::Error.is_terminal());
        assert!(NotificationKind::Interrupted.is_terminal());
        assert!(!NotificationKind::Action.is_terminal());
        assert!(!NotificationKind::Thinking.is_terminal());
    }
}
