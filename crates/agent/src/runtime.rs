use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use surfpilot_core::config::AgentDefaults;
use surfpilot_core::types::{Environment, PendingSafetyCheck, ToolCatalog, TranscriptItem, UiAction};
use surfpilot_core::{safe_truncate, Error, NotificationKind, Result, TurnOutcome};
use surfpilot_providers::Oracle;
use surfpilot_tools::registry::to_output;
use surfpilot_tools::{surface, Surface, ToolContext, ToolRegistry, UrlBlocklist};
use tracing::{debug, error, info, warn};

use crate::bus::NotificationSink;

/// Decides whether a pending safety check may go ahead, given its message.
pub type SafetyAcknowledger = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Acknowledger that refuses every check.
pub fn deny_all() -> SafetyAcknowledger {
    Arc::new(|_| false)
}

/// Acknowledger that accepts every check.
pub fn allow_all() -> SafetyAcknowledger {
    Arc::new(|_| true)
}

/// Drives one conversation against a surface: queries the oracle, executes
/// what it asks for and feeds the results back until the oracle answers in
/// plain text, the turn is interrupted, or something fails.
pub struct Agent {
    session_id: String,
    oracle: Arc<dyn Oracle>,
    surface: Arc<dyn Surface>,
    tools: ToolRegistry,
    blocklist: UrlBlocklist,
    max_iterations: u32,
    interrupted: Arc<AtomicBool>,
    acknowledge: SafetyAcknowledger,
}

impl Agent {
    pub fn new(session_id: &str, oracle: Arc<dyn Oracle>, surface: Arc<dyn Surface>) -> Self {
        Self {
            session_id: session_id.to_string(),
            oracle,
            surface,
            tools: ToolRegistry::with_defaults(),
            blocklist: UrlBlocklist::default(),
            max_iterations: 50,
            interrupted: Arc::new(AtomicBool::new(false)),
            acknowledge: deny_all(),
        }
    }

    /// Build an agent with blocklist, iteration cap and safety policy taken
    /// from the agent defaults.
    pub fn from_defaults(
        session_id: &str,
        defaults: &AgentDefaults,
        oracle: Arc<dyn Oracle>,
        surface: Arc<dyn Surface>,
    ) -> Self {
        let acknowledge = if defaults.auto_acknowledge_safety_checks {
            allow_all()
        } else {
            deny_all()
        };
        Self::new(session_id, oracle, surface)
            .with_blocklist(UrlBlocklist::new(&defaults.blocked_domains))
            .with_max_iterations(defaults.max_iterations)
            .with_safety_acknowledger(acknowledge)
    }

    pub fn with_blocklist(mut self, blocklist: UrlBlocklist) -> Self {
        self.blocklist = blocklist;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_safety_acknowledger(mut self, acknowledge: SafetyAcknowledger) -> Self {
        self.acknowledge = acknowledge;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn surface(&self) -> &Arc<dyn Surface> {
        &self.surface
    }

    /// Ask the running turn to stop at its next step boundary.
    pub fn interrupt(&self) {
        info!(session_id = %self.session_id, "Interrupt requested");
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn catalog(&self) -> ToolCatalog {
        let (display_width, display_height) = self.surface.dimensions();
        ToolCatalog {
            functions: self.tools.get_tool_schemas(),
            display_width,
            display_height,
            environment: self.surface.environment(),
        }
    }

    /// Run one turn starting from `input`. `history` is everything before it;
    /// the returned outcome carries only what this turn produced, beginning
    /// with the user message.
    ///
    /// An interrupt raised before the turn starts stops it before the first
    /// oracle query. The flag is cleared when the turn ends.
    pub async fn run_turn(
        &self,
        history: &[TranscriptItem],
        input: &str,
        sink: &dyn NotificationSink,
    ) -> TurnOutcome {
        let catalog = self.catalog();
        let mut items = vec![TranscriptItem::user(input)];
        info!(
            session_id = %self.session_id,
            history_len = history.len(),
            "Turn started"
        );

        for iteration in 0..self.max_iterations {
            if self.is_interrupted() {
                return self.finish_interrupted(items, sink);
            }

            let mut context = Vec::with_capacity(history.len() + items.len());
            context.extend_from_slice(history);
            context.extend_from_slice(&items);

            debug!(session_id = %self.session_id, iteration, "Querying oracle");
            let response = match self.oracle.query(&context, &catalog).await {
                Ok(response) => response,
                Err(e) => return self.finish_failed(items, e, sink),
            };

            if response.is_empty() {
                debug!(session_id = %self.session_id, iteration, "Oracle returned nothing");
                return self.finish_completed(items, sink);
            }

            let ends_with_message = response
                .last()
                .map(TranscriptItem::is_assistant_message)
                .unwrap_or(false);

            for item in response {
                if self.is_interrupted() {
                    return self.finish_interrupted(items, sink);
                }

                match item {
                    TranscriptItem::Reasoning { .. } => items.push(item),
                    TranscriptItem::AssistantMessage { ref text } => {
                        debug!(session_id = %self.session_id, text = %safe_truncate(text, 200), "Assistant message");
                        sink.notify(text, NotificationKind::Thinking);
                        items.push(item);
                    }
                    TranscriptItem::ToolCall {
                        ref name,
                        ref arguments,
                        ref call_id,
                    } => {
                        let output = self.run_tool(name, arguments).await;
                        let call_id = call_id.clone();
                        items.push(item);
                        items.push(TranscriptItem::ToolResult { call_id, output });
                    }
                    TranscriptItem::UiActionCall {
                        ref action,
                        ref call_id,
                        ref pending_safety_checks,
                    } => {
                        sink.notify(&action.to_string(), NotificationKind::Action);
                        let performed = self.run_action(action, call_id, pending_safety_checks).await;
                        match performed {
                            Ok(result) => {
                                items.push(item);
                                items.push(result);
                            }
                            // A failed call is not recorded: history keeps every call paired.
                            Err(e) => return self.finish_failed(items, e, sink),
                        }
                    }
                    other => {
                        warn!(
                            session_id = %self.session_id,
                            item = ?other.redacted(),
                            "Ignoring unexpected item from oracle"
                        );
                    }
                }
            }

            if ends_with_message {
                return self.finish_completed(items, sink);
            }
        }

        warn!(
            session_id = %self.session_id,
            max_iterations = self.max_iterations,
            "Turn hit iteration limit"
        );
        let err = Error::Other(format!(
            "stopped after {} oracle queries without a final answer",
            self.max_iterations
        ));
        self.finish_failed(items, err, sink)
    }

    async fn run_tool(&self, name: &str, arguments: &str) -> String {
        let params: Value = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(arguments) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tool = name, error = %e, "Tool arguments are not valid JSON");
                    return to_output(&Err(Error::InvalidArgument(format!(
                        "arguments for {} are not valid JSON: {}",
                        name, e
                    ))));
                }
            }
        };

        info!(session_id = %self.session_id, tool = name, "Executing tool");
        let ctx = ToolContext {
            session_id: self.session_id.clone(),
            surface: self.surface.clone(),
        };
        let result = self.tools.execute(name, ctx, params).await;
        if let Err(ref e) = result {
            warn!(session_id = %self.session_id, tool = name, error = %e, "Tool failed");
        }
        to_output(&result)
    }

    async fn run_action(
        &self,
        action: &UiAction,
        call_id: &str,
        pending: &[PendingSafetyCheck],
    ) -> Result<TranscriptItem> {
        info!(
            session_id = %self.session_id,
            action = action.name(),
            call_id,
            "Executing action"
        );
        let performed = surface::perform(self.surface.as_ref(), action).await;
        let screenshot = self.surface.screenshot().await;
        performed?;
        let screenshot = screenshot?;

        for check in pending {
            if !(self.acknowledge)(&check.message) {
                warn!(
                    session_id = %self.session_id,
                    check_id = %check.id,
                    code = %check.code,
                    "Safety check not acknowledged"
                );
                return Err(Error::SafetyCheckRejected(if check.message.is_empty() {
                    check.code.clone()
                } else {
                    check.message.clone()
                }));
            }
        }

        let current_url = if self.surface.environment() == Environment::Browser {
            let url = self.surface.current_url().await?;
            self.blocklist.check(&url)?;
            Some(url)
        } else {
            None
        };

        Ok(TranscriptItem::UiActionResult {
            call_id: call_id.to_string(),
            screenshot,
            current_url,
            acknowledged_safety_checks: pending.to_vec(),
        })
    }

    fn finish_completed(&self, items: Vec<TranscriptItem>, sink: &dyn NotificationSink) -> TurnOutcome {
        let text = items
            .iter()
            .rev()
            .find_map(|item| match item {
                TranscriptItem::AssistantMessage { text } => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or("Task complete");
        sink.notify(text, NotificationKind::Complete);
        info!(session_id = %self.session_id, items = items.len(), "Turn completed");
        self.interrupted.store(false, Ordering::SeqCst);
        TurnOutcome::completed(items)
    }

    fn finish_interrupted(&self, mut items: Vec<TranscriptItem>, sink: &dyn NotificationSink) -> TurnOutcome {
        drop_dangling_reasoning(&mut items);
        self.interrupted.store(false, Ordering::SeqCst);
        sink.notify("Interrupted", NotificationKind::Interrupted);
        info!(session_id = %self.session_id, items = items.len(), "Turn interrupted");
        TurnOutcome::interrupted(items)
    }

    fn finish_failed(
        &self,
        mut items: Vec<TranscriptItem>,
        err: Error,
        sink: &dyn NotificationSink,
    ) -> TurnOutcome {
        error!(
            session_id = %self.session_id,
            kind = err.kind(),
            error = %err,
            "Turn failed"
        );
        let message = err.to_string();
        drop_dangling_reasoning(&mut items);
        self.interrupted.store(false, Ordering::SeqCst);
        items.push(TranscriptItem::assistant(&format!("I had to stop: {}", message)));
        sink.notify(&message, NotificationKind::Error);
        TurnOutcome::failed(items, message)
    }
}

/// Reasoning is only valid in front of the item it produced. Strip any
/// trailing reasoning whose call was never recorded.
fn drop_dangling_reasoning(items: &mut Vec<TranscriptItem>) {
    while matches!(items.last(), Some(TranscriptItem::Reasoning { .. })) {
        items.pop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use surfpilot_core::types::{MouseButton, Point};
    use surfpilot_core::TurnStatus;

    pub(crate) struct ScriptedOracle {
        script: Mutex<VecDeque<Result<Vec<TranscriptItem>>>>,
        pub queries: AtomicUsize,
        pub interrupt_on_query: Mutex<Option<Arc<AtomicBool>>>,
        pub repeat: Option<Vec<TranscriptItem>>,
    }

    impl ScriptedOracle {
        pub(crate) fn new(script: Vec<Result<Vec<TranscriptItem>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                queries: AtomicUsize::new(0),
                interrupt_on_query: Mutex::new(None),
                repeat: None,
            }
        }

        pub(crate) fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn query(&self, _history: &[TranscriptItem], _catalog: &ToolCatalog) -> Result<Vec<TranscriptItem>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if let Some(flag) = self.interrupt_on_query.lock().unwrap().as_ref() {
                flag.store(true, Ordering::SeqCst);
            }
            if let Some(repeat) = &self.repeat {
                return Ok(repeat.clone());
            }
            self.script.lock().unwrap().pop_front().unwrap_or_else(|| Ok(vec![]))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub calls: Mutex<Vec<String>>,
        pub url: Mutex<String>,
        pub fail_actions: bool,
        pub interrupt_on_click: Mutex<Option<Arc<AtomicBool>>>,
        pub closed: AtomicBool,
    }

    impl RecordingSurface {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail_actions {
                return Err(Error::ActionFailed("x".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Surface for RecordingSurface {
        fn environment(&self) -> Environment {
            Environment::Browser
        }
        fn dimensions(&self) -> (u32, u32) {
            (1024, 768)
        }
        async fn click(&self, x: i64, y: i64, button: MouseButton) -> Result<()> {
            if let Some(flag) = self.interrupt_on_click.lock().unwrap().as_ref() {
                flag.store(true, Ordering::SeqCst);
            }
            self.record(format!("click {},{} {}", x, y, button.as_str()))
        }
        async fn double_click(&self, x: i64, y: i64) -> Result<()> {
            self.record(format!("double_click {},{}", x, y))
        }
        async fn move_pointer(&self, x: i64, y: i64) -> Result<()> {
            self.record(format!("move {},{}", x, y))
        }
        async fn drag(&self, path: &[Point]) -> Result<()> {
            self.record(format!("drag {}", path.len()))
        }
        async fn scroll(&self, x: i64, y: i64, dx: i64, dy: i64) -> Result<()> {
            self.record(format!("scroll {},{} {},{}", x, y, dx, dy))
        }
        async fn keypress(&self, keys: &[String]) -> Result<()> {
            self.record(format!("keypress {}", keys.join("+")))
        }
        async fn type_text(&self, text: &str) -> Result<()> {
            self.record(format!("type {}", text))
        }
        async fn wait(&self, ms: u64) -> Result<()> {
            self.record(format!("wait {}", ms))
        }
        async fn navigate(&self, url: &str) -> Result<()> {
            *self.url.lock().unwrap() = url.to_string();
            self.record(format!("navigate {}", url))
        }
        async fn back(&self) -> Result<()> {
            self.record("back".to_string())
        }
        async fn forward(&self) -> Result<()> {
            self.record("forward".to_string())
        }
        async fn screenshot(&self) -> Result<String> {
            self.calls.lock().unwrap().push("screenshot".to_string());
            Ok("c2hvdA==".to_string())
        }
        async fn current_url(&self) -> Result<String> {
            Ok(self.url.lock().unwrap().clone())
        }
        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub seen: Mutex<Vec<(String, NotificationKind)>>,
    }

    impl RecordingSink {
        pub(crate) fn count(&self, kind: NotificationKind) -> usize {
            self.seen.lock().unwrap().iter().filter(|(_, k)| *k == kind).count()
        }
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, text: &str, kind: NotificationKind) {
            self.seen.lock().unwrap().push((text.to_string(), kind));
        }
    }

    fn click_call(call_id: &str, checks: Vec<PendingSafetyCheck>) -> TranscriptItem {
        TranscriptItem::UiActionCall {
            action: UiAction::Click { x: 100, y: 50, button: MouseButton::Left },
            call_id: call_id.to_string(),
            pending_safety_checks: checks,
        }
    }

    fn check(message: &str) -> PendingSafetyCheck {
        PendingSafetyCheck {
            id: "sc_1".to_string(),
            code: "malicious_instructions".to_string(),
            message: message.to_string(),
        }
    }

    fn agent(oracle: Arc<ScriptedOracle>, surface: Arc<RecordingSurface>) -> Agent {
        Agent::new("s1", oracle, surface)
    }

    fn count_results(items: &[TranscriptItem]) -> usize {
        items
            .iter()
            .filter(|i| matches!(i, TranscriptItem::UiActionResult { .. }))
            .count()
    }

    fn count_messages(items: &[TranscriptItem]) -> usize {
        items.iter().filter(|i| i.is_assistant_message()).count()
    }

    #[tokio::test]
    async fn test_click_then_done_completes() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            Ok(vec![click_call("c1", vec![])]),
            Ok(vec![TranscriptItem::assistant("done")]),
        ]));
        let surface = Arc::new(RecordingSurface::default());
        let sink = RecordingSink::default();

        let outcome = agent(oracle.clone(), surface.clone()).run_turn(&[], "search", &sink).await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(count_results(&outcome.items), 1);
        assert_eq!(count_messages(&outcome.items), 1);
        assert!(matches!(&outcome.items[0], TranscriptItem::UserMessage { text } if text == "search"));
        assert_eq!(sink.count(NotificationKind::Complete), 1);
        assert_eq!(sink.count(NotificationKind::Action), 1);
        assert_eq!(sink.count(NotificationKind::Thinking), 1);
        assert_eq!(surface.calls(), vec!["click 100,50 left", "screenshot"]);
        assert_eq!(oracle.queries(), 2);
    }

    #[tokio::test]
    async fn test_result_carries_screenshot_and_url() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Ok(vec![click_call("c1", vec![])])]));
        let surface = Arc::new(RecordingSurface::default());
        *surface.url.lock().unwrap() = "https://example.com/".to_string();

        let outcome = agent(oracle, surface).run_turn(&[], "go", &RecordingSink::default()).await;

        let result = outcome
            .items
            .iter()
            .find(|i| matches!(i, TranscriptItem::UiActionResult { .. }))
            .unwrap();
        match result {
            TranscriptItem::UiActionResult { call_id, screenshot, current_url, .. } => {
                assert_eq!(call_id, "c1");
                assert_eq!(screenshot, "c2hvdA==");
                assert_eq!(current_url.as_deref(), Some("https://example.com/"));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_unacknowledged_safety_check_fails_turn() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            Ok(vec![click_call("c1", vec![check("Suspicious page")])]),
            Ok(vec![TranscriptItem::assistant("never reached")]),
        ]));
        let surface = Arc::new(RecordingSurface::default());
        let sink = RecordingSink::default();

        let outcome = agent(oracle.clone(), surface.clone()).run_turn(&[], "go", &sink).await;

        assert_eq!(outcome.status, TurnStatus::Failed);
        assert!(outcome.error.unwrap().contains("Suspicious page"));
        assert_eq!(sink.count(NotificationKind::Error), 1);
        assert_eq!(sink.count(NotificationKind::Complete), 0);
        assert_eq!(oracle.queries(), 1);
        assert_eq!(surface.calls(), vec!["click 100,50 left", "screenshot"]);
        assert!(!outcome
            .items
            .iter()
            .any(|i| matches!(i, TranscriptItem::UiActionCall { .. })));
    }

    #[tokio::test]
    async fn test_acknowledged_safety_check_is_echoed() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            Ok(vec![click_call("c1", vec![check("Suspicious page")])]),
            Ok(vec![TranscriptItem::assistant("ok")]),
        ]));
        let surface = Arc::new(RecordingSurface::default());
        let asked = Arc::new(Mutex::new(Vec::new()));
        let asked_clone = asked.clone();
        let ack: SafetyAcknowledger = Arc::new(move |msg: &str| {
            asked_clone.lock().unwrap().push(msg.to_string());
            true
        });

        let outcome = agent(oracle, surface)
            .with_safety_acknowledger(ack)
            .run_turn(&[], "go", &RecordingSink::default())
            .await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(*asked.lock().unwrap(), vec!["Suspicious page".to_string()]);
        let acked = outcome.items.iter().find_map(|i| match i {
            TranscriptItem::UiActionResult { acknowledged_safety_checks, .. } => Some(acknowledged_safety_checks.clone()),
            _ => None,
        });
        assert_eq!(acked.unwrap()[0].id, "sc_1");
    }

    #[tokio::test]
    async fn test_interrupt_before_first_response_emits_no_actions() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Ok(vec![click_call("c1", vec![])])]));
        let surface = Arc::new(RecordingSurface::default());
        let agent = agent(oracle.clone(), surface.clone());
        *oracle.interrupt_on_query.lock().unwrap() = Some(agent.interrupt_handle());
        let sink = RecordingSink::default();

        let outcome = agent.run_turn(&[], "go", &sink).await;

        assert_eq!(outcome.status, TurnStatus::Interrupted);
        assert_eq!(sink.count(NotificationKind::Action), 0);
        assert_eq!(sink.count(NotificationKind::Interrupted), 1);
        assert!(surface.calls().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_mid_batch_finishes_current_action() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Ok(vec![
            click_call("c1", vec![]),
            click_call("c2", vec![]),
        ])]));
        let surface = Arc::new(RecordingSurface::default());
        let agent = agent(oracle.clone(), surface.clone());
        *surface.interrupt_on_click.lock().unwrap() = Some(agent.interrupt_handle());
        let sink = RecordingSink::default();

        let outcome = agent.run_turn(&[], "go", &sink).await;

        assert_eq!(outcome.status, TurnStatus::Interrupted);
        assert_eq!(surface.calls(), vec!["click 100,50 left", "screenshot"]);
        assert_eq!(count_results(&outcome.items), 1);
        assert_eq!(outcome.items.last().and_then(|i| i.call_id()), Some("c1"));
        assert_eq!(sink.count(NotificationKind::Action), 1);
        assert_eq!(sink.count(NotificationKind::Interrupted), 1);
        assert_eq!(oracle.queries(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_before_turn_starts_is_honored() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Ok(vec![click_call("c1", vec![])])]));
        let surface = Arc::new(RecordingSurface::default());
        let agent = agent(oracle.clone(), surface.clone());
        let sink = RecordingSink::default();

        agent.interrupt();
        let outcome = agent.run_turn(&[], "go", &sink).await;

        assert_eq!(outcome.status, TurnStatus::Interrupted);
        assert_eq!(oracle.queries(), 0);
        assert_eq!(sink.count(NotificationKind::Interrupted), 1);
        assert!(surface.calls().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_is_cleared_when_turn_ends() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Ok(vec![TranscriptItem::assistant("hi")])]));
        let agent = agent(oracle, Arc::new(RecordingSurface::default()));
        agent.interrupt();
        let first = agent.run_turn(&[], "hello", &RecordingSink::default()).await;
        assert_eq!(first.status, TurnStatus::Interrupted);

        let second = agent.run_turn(&first.items, "hello again", &RecordingSink::default()).await;
        assert_eq!(second.status, TurnStatus::Completed);
    }

    fn reasoning(id: &str) -> TranscriptItem {
        TranscriptItem::Reasoning {
            raw: serde_json::json!({"type": "reasoning", "id": id, "summary": []}),
        }
    }

    #[tokio::test]
    async fn test_reasoning_is_kept_ahead_of_its_call() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            Ok(vec![reasoning("rs_1"), click_call("c1", vec![])]),
            Ok(vec![TranscriptItem::assistant("done")]),
        ]));
        let sink = RecordingSink::default();

        let outcome = agent(oracle, Arc::new(RecordingSurface::default()))
            .run_turn(&[], "go", &sink)
            .await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert!(matches!(outcome.items[1], TranscriptItem::Reasoning { .. }));
        assert_eq!(outcome.items[2].call_id(), Some("c1"));
        assert_eq!(sink.count(NotificationKind::Thinking), 1);
    }

    #[tokio::test]
    async fn test_failed_call_drops_its_reasoning() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Ok(vec![reasoning("rs_1"), click_call("c1", vec![])])]));
        let surface = Arc::new(RecordingSurface { fail_actions: true, ..Default::default() });

        let outcome = agent(oracle, surface).run_turn(&[], "go", &RecordingSink::default()).await;

        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(outcome.items.len(), 2);
        assert!(outcome.items[1].is_assistant_message());
    }

    #[tokio::test]
    async fn test_oracle_failure_is_terminal() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Err(Error::OracleTransport(
            "HTTP 429".to_string(),
        ))]));
        let sink = RecordingSink::default();

        let outcome = agent(oracle, Arc::new(RecordingSurface::default()))
            .run_turn(&[], "go", &sink)
            .await;

        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(sink.count(NotificationKind::Error), 1);
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
        match outcome.items.last().unwrap() {
            TranscriptItem::AssistantMessage { text } => assert!(text.contains("HTTP 429")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_primitive_failure_is_terminal() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Ok(vec![TranscriptItem::UiActionCall {
            action: UiAction::Navigate { url: "https://a.b".to_string() },
            call_id: "c1".to_string(),
            pending_safety_checks: vec![],
        }])]));
        let surface = Arc::new(RecordingSurface { fail_actions: true, ..Default::default() });
        let sink = RecordingSink::default();

        let outcome = agent(oracle.clone(), surface.clone()).run_turn(&[], "go", &sink).await;

        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("x"));
        assert_eq!(sink.count(NotificationKind::Error), 1);
        assert_eq!(oracle.queries(), 1);
        // Screenshot is still captured after a failed primitive.
        assert_eq!(surface.calls(), vec!["navigate https://a.b", "screenshot"]);
    }

    #[tokio::test]
    async fn test_blocked_url_fails_turn() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Ok(vec![click_call("c1", vec![])])]));
        let surface = Arc::new(RecordingSurface::default());
        *surface.url.lock().unwrap() = "https://evil.com/login".to_string();
        let sink = RecordingSink::default();

        let outcome = agent(oracle, surface)
            .with_blocklist(UrlBlocklist::new(&["evil.com".to_string()]))
            .run_turn(&[], "go", &sink)
            .await;

        assert_eq!(outcome.status, TurnStatus::Failed);
        assert!(outcome.error.unwrap().starts_with("Blocked URL"));
        assert_eq!(sink.count(NotificationKind::Error), 1);
    }

    #[tokio::test]
    async fn test_tool_calls_feed_results_back() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            Ok(vec![
                TranscriptItem::ToolCall {
                    name: "goto".to_string(),
                    arguments: r#"{"url":"https://example.com/"}"#.to_string(),
                    call_id: "f1".to_string(),
                },
                TranscriptItem::ToolCall {
                    name: "teleport".to_string(),
                    arguments: String::new(),
                    call_id: "f2".to_string(),
                },
            ]),
            Ok(vec![TranscriptItem::assistant("there")]),
        ]));
        let surface = Arc::new(RecordingSurface::default());
        let sink = RecordingSink::default();

        let outcome = agent(oracle, surface.clone()).run_turn(&[], "go", &sink).await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        let outputs: Vec<&str> = outcome
            .items
            .iter()
            .filter_map(|i| match i {
                TranscriptItem::ToolResult { output, .. } => Some(output.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(outputs, vec!["Navigated to https://example.com/", "error: Unknown tool: teleport"]);
        assert_eq!(surface.calls(), vec!["navigate https://example.com/"]);
        assert_eq!(sink.count(NotificationKind::Action), 0);
    }

    #[tokio::test]
    async fn test_empty_response_completes() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Ok(vec![])]));
        let sink = RecordingSink::default();
        let outcome = agent(oracle, Arc::new(RecordingSurface::default()))
            .run_turn(&[], "go", &sink)
            .await;
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(sink.count(NotificationKind::Complete), 1);
    }

    #[tokio::test]
    async fn test_iteration_cap_fails_turn() {
        let oracle = Arc::new(ScriptedOracle {
            repeat: Some(vec![click_call("c", vec![])]),
            ..ScriptedOracle::new(vec![])
        });
        let sink = RecordingSink::default();

        let outcome = agent(oracle.clone(), Arc::new(RecordingSurface::default()))
            .with_max_iterations(3)
            .run_turn(&[], "loop", &sink)
            .await;

        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(oracle.queries(), 3);
        assert_eq!(sink.count(NotificationKind::Error), 1);
        assert_eq!(sink.count(NotificationKind::Action), 3);
    }

    #[tokio::test]
    async fn test_catalog_reflects_surface_and_tools() {
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let catalog = agent(oracle, Arc::new(RecordingSurface::default())).catalog();
        assert_eq!((catalog.display_width, catalog.display_height), (1024, 768));
        assert_eq!(catalog.environment, Environment::Browser);
        assert_eq!(catalog.functions.len(), 3);
    }

    #[test]
    fn test_from_defaults_applies_safety_policy() {
        let mut defaults = AgentDefaults::default();
        defaults.auto_acknowledge_safety_checks = true;
        defaults.max_iterations = 0;
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let agent = Agent::from_defaults("s1", &defaults, oracle, Arc::new(RecordingSurface::default()));
        assert!((agent.acknowledge)("anything"));
        assert_eq!(agent.max_iterations, 1);
    }
}
