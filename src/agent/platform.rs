//! In-process agent container
//!
//! Hosts `CacheAgent`s as tokio tasks and plays the platform's part: it
//! keeps the registration list, tracks which agent controls the page, routes
//! control messages, and emits lifecycle signals. A deployment is simulated
//! with [`InProcessContainer::install_update`].

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::base::{
    AgentContainer, AgentError, AgentTransport, Envelope, LifecycleSignal, Registration,
    ReplyPort,
};
use super::worker::CacheAgent;
use crate::cache::MemoryCacheStorage;
use crate::protocol::ControlMessage;

const SIGNAL_CAPACITY: usize = 64;

struct ActiveAgent {
    agent: Arc<CacheAgent>,
    inbox: mpsc::UnboundedSender<Envelope>,
}

struct ContainerState {
    registrations: Vec<Arc<InProcessRegistration>>,
    controller: Option<ActiveAgent>,
    deployed_version: String,
    deployed_cache_version: String,
    next_id: u64,
    register_calls: usize,
}

type SharedState = Arc<Mutex<ContainerState>>;

fn lock(state: &SharedState) -> Result<MutexGuard<'_, ContainerState>, AgentError> {
    state
        .lock()
        .map_err(|_| AgentError::Transport("container state poisoned".to_string()))
}

/// Registration handle returned by [`InProcessContainer`]
pub struct InProcessRegistration {
    id: u64,
    scope: String,
    script_url: String,
    state: SharedState,
}

#[async_trait]
impl Registration for InProcessRegistration {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn script_url(&self) -> &str {
        &self.script_url
    }

    async fn unregister(&self) -> Result<bool, AgentError> {
        let mut state = lock(&self.state)?;
        let before = state.registrations.len();
        state.registrations.retain(|r| r.id != self.id);
        let removed = state.registrations.len() != before;

        if removed && state.registrations.is_empty() {
            if let Some(active) = state.controller.take() {
                active.agent.stop();
            }
        }

        tracing::debug!("Unregistered agent for scope {} (existed: {})", self.scope, removed);
        Ok(removed)
    }
}

/// Agent container hosting agents inside the current process
pub struct InProcessContainer {
    supported: bool,
    caches: Arc<MemoryCacheStorage>,
    signals: broadcast::Sender<LifecycleSignal>,
    state: SharedState,
}

impl InProcessContainer {
    /// Creates a container that will serve agents of the given version
    pub fn new(version: impl Into<String>, cache_version: impl Into<String>) -> Self {
        Self::with_caches(Arc::new(MemoryCacheStorage::new()), version, cache_version)
    }

    /// Creates a container over an existing bucket store
    pub fn with_caches(
        caches: Arc<MemoryCacheStorage>,
        version: impl Into<String>,
        cache_version: impl Into<String>,
    ) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            supported: true,
            caches,
            signals,
            state: Arc::new(Mutex::new(ContainerState {
                registrations: Vec::new(),
                controller: None,
                deployed_version: version.into(),
                deployed_cache_version: cache_version.into(),
                next_id: 0,
                register_calls: 0,
            })),
        }
    }

    /// Creates a container for an environment without agent support
    pub fn unsupported() -> Self {
        let mut container = Self::new("", "");
        container.supported = false;
        container
    }

    /// Bucket store shared by the page and the agents
    pub fn caches(&self) -> Arc<MemoryCacheStorage> {
        Arc::clone(&self.caches)
    }

    /// Agent currently controlling the page
    pub fn controller(&self) -> Option<Arc<CacheAgent>> {
        lock(&self.state)
            .ok()
            .and_then(|s| s.controller.as_ref().map(|a| Arc::clone(&a.agent)))
    }

    pub fn registration_count(&self) -> usize {
        lock(&self.state).map(|s| s.registrations.len()).unwrap_or(0)
    }

    /// Number of times `register` has been called
    pub fn register_calls(&self) -> usize {
        lock(&self.state).map(|s| s.register_calls).unwrap_or(0)
    }

    /// Deploys a new agent version and runs the update flow
    ///
    /// Signals `UpdateFound`, activates the new agent, then signals
    /// `UpdateActivated` and `ControllerChange`. Does nothing if no agent is
    /// registered yet; the next registration picks up the new version.
    pub async fn install_update(
        &self,
        version: impl Into<String>,
        cache_version: impl Into<String>,
    ) -> Result<(), AgentError> {
        let (version, cache_version, registered) = {
            let mut state = lock(&self.state)?;
            state.deployed_version = version.into();
            state.deployed_cache_version = cache_version.into();
            (
                state.deployed_version.clone(),
                state.deployed_cache_version.clone(),
                !state.registrations.is_empty(),
            )
        };

        if registered {
            self.activate(version, cache_version, true).await?;
        }
        Ok(())
    }

    async fn activate(
        &self,
        version: String,
        cache_version: String,
        is_update: bool,
    ) -> Result<(), AgentError> {
        if is_update {
            tracing::info!("Agent update found: {}", version);
            self.signal(LifecycleSignal::UpdateFound);
        }

        let agent = Arc::new(CacheAgent::new(
            version,
            cache_version,
            self.caches.clone(),
            self.signals.clone(),
        ));
        agent.activate().await;

        let (inbox, rx) = mpsc::unbounded_channel();
        let runner = Arc::clone(&agent);
        tokio::spawn(async move {
            if let Err(e) = runner.run(rx).await {
                tracing::error!("Agent '{}' error: {}", runner.version(), e);
            }
        });

        let previous = lock(&self.state)?.controller.replace(ActiveAgent { agent, inbox });
        if let Some(previous) = previous {
            previous.agent.stop();
        }

        if is_update {
            self.signal(LifecycleSignal::UpdateActivated);
        }
        self.signal(LifecycleSignal::ControllerChange);
        Ok(())
    }

    fn signal(&self, signal: LifecycleSignal) {
        // Err only means no page is listening
        let _ = self.signals.send(signal);
    }
}

impl AgentTransport for InProcessContainer {
    fn has_controller(&self) -> bool {
        lock(&self.state)
            .map(|s| s.controller.is_some())
            .unwrap_or(false)
    }

    fn post(&self, message: ControlMessage, reply: Option<ReplyPort>) -> Result<(), AgentError> {
        let state = lock(&self.state)?;
        let active = state.controller.as_ref().ok_or(AgentError::NoController)?;

        active
            .inbox
            .send(Envelope { message, reply })
            .map_err(|e| AgentError::Transport(format!("agent inbox closed ({})", e.0.message.command())))
    }
}

#[async_trait]
impl AgentContainer for InProcessContainer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn registrations(&self) -> Result<Vec<Arc<dyn Registration>>, AgentError> {
        if !self.supported {
            return Err(AgentError::Unsupported);
        }

        let state = lock(&self.state)?;
        Ok(state
            .registrations
            .iter()
            .map(|r| Arc::clone(r) as Arc<dyn Registration>)
            .collect())
    }

    async fn register(
        &self,
        script_url: &str,
        scope: &str,
    ) -> Result<Arc<dyn Registration>, AgentError> {
        if !self.supported {
            return Err(AgentError::Unsupported);
        }
        if !scope.starts_with('/') {
            return Err(AgentError::Registration(format!("invalid scope '{}'", scope)));
        }

        let (registration, pending) = {
            let mut state = lock(&self.state)?;
            state.register_calls += 1;

            let existing = state.registrations.iter().find(|r| r.scope == scope).cloned();
            let registration = match existing {
                Some(existing) => existing,
                None => {
                    state.next_id += 1;
                    let registration = Arc::new(InProcessRegistration {
                        id: state.next_id,
                        scope: scope.to_string(),
                        script_url: script_url.to_string(),
                        state: Arc::clone(&self.state),
                    });
                    state.registrations.push(Arc::clone(&registration));
                    registration
                }
            };

            // Same version already in control: the registration is a no-op
            let current = state.controller.as_ref().map(|a| a.agent.version().to_string());
            let pending = match current {
                Some(ref v) if *v == state.deployed_version => None,
                Some(_) => Some((
                    state.deployed_version.clone(),
                    state.deployed_cache_version.clone(),
                    true,
                )),
                None => Some((
                    state.deployed_version.clone(),
                    state.deployed_cache_version.clone(),
                    false,
                )),
            };
            (registration, pending)
        };

        tracing::debug!("Registered {} for scope {}", script_url, scope);

        if let Some((version, cache_version, is_update)) = pending {
            self.activate(version, cache_version, is_update).await?;
        }

        Ok(registration as Arc<dyn Registration>)
    }

    fn subscribe(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.signals.subscribe()
    }
}
