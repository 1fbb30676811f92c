use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};
use surfpilot_core::config::{AgentDefaults, SessionsConfig};
use surfpilot_core::types::{Environment, TranscriptItem};
use surfpilot_core::{Config, Error, Notification, NotificationKind, Paths, Result, TurnOutcome};
use surfpilot_providers::Oracle;
use surfpilot_tools::browser::BrowserLauncher;
use surfpilot_tools::{LocalExecutor, RemoteExecutor, Surface};
use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::bus::NotificationSink;
use crate::runtime::Agent;

/// A freshly provisioned surface. `remote` is set when the surface is a
/// [`RemoteExecutor`] waiting for a host to attach.
pub struct Provisioned {
    pub surface: Arc<dyn Surface>,
    pub remote: Option<Arc<RemoteExecutor>>,
}

/// Creates the surface backing a new session.
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    async fn provision(&self, session_id: &str) -> Result<Provisioned>;
}

/// Launches a browser per session and opens the start page.
pub struct LocalSurfaceFactory {
    launcher: BrowserLauncher,
    start_url: String,
    environment: Environment,
    width: u32,
    height: u32,
}

impl LocalSurfaceFactory {
    pub fn from_config(config: &Config, paths: &Paths) -> Self {
        let defaults = &config.agents.defaults;
        Self {
            launcher: BrowserLauncher::from_config(config, paths),
            start_url: defaults.start_url.clone(),
            environment: defaults.environment,
            width: defaults.display_width,
            height: defaults.display_height,
        }
    }

    pub fn with_start_url(mut self, url: &str) -> Self {
        self.start_url = url.to_string();
        self
    }
}

#[async_trait]
impl SurfaceFactory for LocalSurfaceFactory {
    async fn provision(&self, session_id: &str) -> Result<Provisioned> {
        let page = self.launcher.launch(session_id).await?;
        let surface = Arc::new(LocalExecutor::new(
            Arc::new(page),
            self.environment,
            self.width,
            self.height,
        ));
        if !self.start_url.is_empty() {
            if let Err(e) = surface.navigate(&self.start_url).await {
                warn!(session_id, url = %self.start_url, error = %e, "Failed to open start page");
            }
        }
        Ok(Provisioned { surface, remote: None })
    }
}

/// Hands out remote executors that wait for an execution host to connect.
pub struct RemoteSurfaceFactory {
    environment: Environment,
    width: u32,
    height: u32,
    timeout: Duration,
}

impl RemoteSurfaceFactory {
    pub fn new(environment: Environment, width: u32, height: u32, timeout: Duration) -> Self {
        Self { environment, width, height, timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        let defaults = &config.agents.defaults;
        Self::new(
            defaults.environment,
            defaults.display_width,
            defaults.display_height,
            Duration::from_millis(config.remote.action_timeout_ms),
        )
    }
}

#[async_trait]
impl SurfaceFactory for RemoteSurfaceFactory {
    async fn provision(&self, session_id: &str) -> Result<Provisioned> {
        let executor = Arc::new(RemoteExecutor::new(
            session_id,
            self.environment,
            self.width,
            self.height,
            self.timeout,
        ));
        Ok(Provisioned {
            surface: executor.clone(),
            remote: Some(executor),
        })
    }
}

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One conversation: its agent, surface, observers and history.
pub struct Session {
    id: String,
    agent: Agent,
    remote: Option<Arc<RemoteExecutor>>,
    observers: StdMutex<HashMap<u64, mpsc::UnboundedSender<Notification>>>,
    next_observer: AtomicU64,
    last_activity: StdMutex<Instant>,
    history: Mutex<Vec<TranscriptItem>>,
}

impl Session {
    fn new(id: &str, agent: Agent, remote: Option<Arc<RemoteExecutor>>) -> Self {
        Self {
            id: id.to_string(),
            agent,
            remote,
            observers: StdMutex::new(HashMap::new()),
            next_observer: AtomicU64::new(1),
            last_activity: StdMutex::new(Instant::now()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn surface(&self) -> &Arc<dyn Surface> {
        self.agent.surface()
    }

    pub fn remote(&self) -> Option<&Arc<RemoteExecutor>> {
        self.remote.as_ref()
    }

    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    /// Whether a turn is running right now.
    pub fn is_busy(&self) -> bool {
        self.history.try_lock().is_err()
    }

    pub async fn history(&self) -> Vec<TranscriptItem> {
        self.history.lock().await.clone()
    }

    fn add_observer(&self) -> (u64, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer_id = self.next_observer.fetch_add(1, Ordering::SeqCst);
        lock(&self.observers).insert(observer_id, tx);
        (observer_id, rx)
    }

    /// Returns how many observers remain.
    fn remove_observer(&self, observer_id: u64) -> usize {
        let mut observers = lock(&self.observers);
        observers.remove(&observer_id);
        observers.len()
    }

    fn is_evictable(&self, idle_timeout: Duration) -> bool {
        self.observer_count() == 0 && self.idle_for() >= idle_timeout && !self.is_busy()
    }

    /// Run a turn for `text`. Turns of one session never overlap; a second
    /// caller waits for the first to finish.
    pub async fn run_message(&self, text: &str) -> TurnOutcome {
        let mut history = self.history.lock().await;
        self.touch();
        let outcome = self.agent.run_turn(&history, text, self).await;
        history.extend(outcome.items.iter().cloned());
        self.touch();
        outcome
    }

    pub fn interrupt(&self) {
        self.agent.interrupt();
    }
}

impl NotificationSink for Session {
    fn notify(&self, text: &str, kind: NotificationKind) {
        let notification = Notification::new(kind, text);
        lock(&self.observers).retain(|_, tx| tx.send(notification.clone()).is_ok());
    }
}

struct RegistryInner {
    sessions: Mutex<HashMap<String, Arc<OnceCell<Arc<Session>>>>>,
    factory: Arc<dyn SurfaceFactory>,
    oracle: Arc<dyn Oracle>,
    defaults: AgentDefaults,
    idle_timeout: Duration,
    eviction_grace: Duration,
}

/// Owns every live session. Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn SurfaceFactory>,
        oracle: Arc<dyn Oracle>,
        defaults: AgentDefaults,
        sessions: &SessionsConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                factory,
                oracle,
                defaults,
                idle_timeout: Duration::from_secs(sessions.idle_timeout_secs),
                eviction_grace: Duration::from_millis(sessions.eviction_grace_ms),
            }),
        }
    }

    /// Return the session for `id`, creating it on first use. Concurrent
    /// callers for the same id share one provisioning; a failed provisioning
    /// leaves no entry behind.
    pub async fn resolve_or_create(&self, id: &str) -> Result<Arc<Session>> {
        let cell = {
            let mut sessions = self.inner.sessions.lock().await;
            sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let created = cell
            .get_or_try_init(|| async {
                info!(session_id = %id, "Creating session");
                let provisioned = self.inner.factory.provision(id).await?;
                let agent = Agent::from_defaults(
                    id,
                    &self.inner.defaults,
                    self.inner.oracle.clone(),
                    provisioned.surface,
                );
                Ok::<_, Error>(Arc::new(Session::new(id, agent, provisioned.remote)))
            })
            .await
            .cloned();

        match created {
            Ok(session) => {
                session.touch();
                Ok(session)
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session provisioning failed");
                let mut sessions = self.inner.sessions.lock().await;
                // Only the map and this caller may hold the cell: any other
                // holder is still waiting to retry the initialization.
                let abandoned = sessions
                    .get(id)
                    .map(|existing| {
                        Arc::ptr_eq(existing, &cell)
                            && existing.get().is_none()
                            && Arc::strong_count(&cell) == 2
                    })
                    .unwrap_or(false);
                if abandoned {
                    sessions.remove(id);
                }
                drop(cell);
                drop(sessions);
                Err(e)
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(id).and_then(|cell| cell.get().cloned())
    }

    /// Start listening to a session's notifications, creating it if needed.
    pub async fn attach_observer(
        &self,
        id: &str,
    ) -> Result<(u64, mpsc::UnboundedReceiver<Notification>)> {
        loop {
            let session = self.resolve_or_create(id).await?;
            let sessions = self.inner.sessions.lock().await;
            let still_registered = sessions
                .get(id)
                .and_then(|cell| cell.get())
                .map(|current| Arc::ptr_eq(current, &session))
                .unwrap_or(false);
            if still_registered {
                let (observer_id, rx) = session.add_observer();
                debug!(session_id = %id, observer_id, "Observer attached");
                return Ok((observer_id, rx));
            }
            debug!(session_id = %id, "Session evicted while attaching, retrying");
        }
    }

    /// Stop listening. When the last observer leaves, an eviction check runs
    /// after the grace delay.
    pub async fn detach_observer(&self, id: &str, observer_id: u64) {
        let Some(session) = self.get(id).await else {
            return;
        };
        let remaining = session.remove_observer(observer_id);
        debug!(session_id = %id, observer_id, remaining, "Observer detached");
        if remaining > 0 {
            return;
        }

        let registry = self.clone();
        let id = id.to_string();
        let grace = self.inner.eviction_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.evict_if_idle(&id).await;
        });
    }

    /// Evict `id` if it has no observers, no running turn and has been idle
    /// past the timeout.
    pub async fn evict_if_idle(&self, id: &str) -> bool {
        let evicted = {
            let mut sessions = self.inner.sessions.lock().await;
            let evictable = sessions
                .get(id)
                .and_then(|cell| cell.get())
                .map(|s| s.is_evictable(self.inner.idle_timeout))
                .unwrap_or(false);
            if !evictable {
                return false;
            }
            sessions.remove(id).and_then(|cell| cell.get().cloned())
        };
        if let Some(session) = evicted {
            release(&session).await;
        }
        true
    }

    /// Evict every idle, unobserved session. Returns the evicted ids.
    pub async fn sweep(&self) -> Vec<String> {
        let evicted: Vec<Arc<Session>> = {
            let mut sessions = self.inner.sessions.lock().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, cell)| {
                    cell.get()
                        .map(|s| s.is_evictable(self.inner.idle_timeout))
                        .unwrap_or(false)
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| sessions.remove(id))
                .filter_map(|cell| cell.get().cloned())
                .collect()
        };

        let mut ids = Vec::with_capacity(evicted.len());
        for session in evicted {
            release(&session).await;
            ids.push(session.id().to_string());
        }
        if !ids.is_empty() {
            info!(count = ids.len(), "Idle sweep evicted sessions");
        }
        ids
    }

    /// Interrupt the running turn of `id`. False when no such session exists.
    pub async fn interrupt(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(session) => {
                session.interrupt();
                true
            }
            None => false,
        }
    }

    /// Resolve the session and run one turn for `text`.
    pub async fn run_message(&self, id: &str, text: &str) -> Result<TurnOutcome> {
        let session = self.resolve_or_create(id).await?;
        Ok(session.run_message(text).await)
    }

    /// Route an execution host connection to the session's remote executor.
    /// Returns the connection generation.
    pub async fn attach_host(&self, id: &str, tx: mpsc::Sender<String>) -> Result<u64> {
        let session = self.resolve_or_create(id).await?;
        let remote = session.remote().ok_or_else(|| {
            Error::InvalidArgument(format!("session {} does not use a remote execution host", id))
        })?;
        Ok(remote.attach(tx).await)
    }

    pub async fn detach_host(&self, id: &str, generation: u64) {
        if let Some(remote) = self.get(id).await.and_then(|s| s.remote().cloned()) {
            remote.detach(generation).await;
        }
    }

    /// Deliver one raw envelope from an execution host. False when the
    /// session is gone or is not remote.
    pub async fn host_message(&self, id: &str, raw: &str) -> bool {
        let Some(session) = self.get(id).await else {
            return false;
        };
        session.touch();
        match session.remote() {
            Some(remote) => {
                remote.handle_inbound(raw).await;
                true
            }
            None => false,
        }
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let sessions = self.inner.sessions.lock().await;
        let mut ids: Vec<String> = sessions
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.session_ids().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Release every session, for shutdown.
    pub async fn close_all(&self) {
        let all: Vec<Arc<Session>> = {
            let mut sessions = self.inner.sessions.lock().await;
            sessions.drain().filter_map(|(_, cell)| cell.get().cloned()).collect()
        };
        for session in all {
            release(&session).await;
        }
    }
}

async fn release(session: &Session) {
    info!(session_id = %session.id(), idle_secs = session.idle_for().as_secs(), "Evicting session");
    if let Err(e) = session.surface().close().await {
        warn!(session_id = %session.id(), error = %e, "Failed to release surface");
    }
}
