pub mod config;
pub mod error;
pub mod message;
pub mod paths;
pub mod types;

pub use config::{Backend, Config};
pub use error::{Error, Result};
pub use message::{Notification, NotificationKind, TurnOutcome, TurnStatus};
pub use paths::Paths;
pub use types::{
    Environment, MouseButton, PendingSafetyCheck, Point, ToolCatalog, TranscriptItem, UiAction,
};

/// Truncate a string to at most `max_bytes` bytes, respecting UTF-8 char boundaries.
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
