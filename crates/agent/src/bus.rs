use surfpilot_core::NotificationKind;

/// Receives progress notifications from a running turn. Delivery is
/// fire-and-forget; a sink must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, text: &str, kind: NotificationKind);
}

impl<F> NotificationSink for F
where
    F: Fn(&str, NotificationKind) + Send + Sync,
{
    fn notify(&self, text: &str, kind: NotificationKind) {
        self(text, kind)
    }
}
