//! Lifecycle manager - Registers and monitors the background agent
//!
//! `setup` runs once when the page becomes interactive. In development it
//! removes every registered agent so nothing intercepts local auth
//! redirects. In production it registers the agent with a cache-busted
//! script URL and starts a listener that reacts to lifecycle signals.
//!
//! Nothing here reloads the page. A new agent version takes effect on the
//! next navigation.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::mode::{AgentMode, Environment};
use crate::agent::{AgentContainer, AgentRegistration, LifecycleSignal};
use crate::coordinator::{CacheCoordinator, Delivery};
use crate::token::CacheBustToken;

/// Where the agent script lives and what it controls
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Root-relative path of the agent script
    pub script_path: String,
    /// Registration scope
    pub scope: String,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            script_path: "/sw.js".to_string(),
            scope: "/".to_string(),
        }
    }
}

/// What `setup` ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// The environment cannot host agents
    Unsupported,
    /// Development mode; this many registrations were removed
    Development { unregistered: usize },
    /// Production mode; the agent is registered and monitored
    Registered,
    /// Production mode, but registration failed
    RegistrationFailed(String),
}

/// Owns agent registration and lifecycle monitoring for one page
pub struct LifecycleManager {
    container: Arc<dyn AgentContainer>,
    coordinator: Arc<CacheCoordinator>,
    environment: Environment,
    settings: LifecycleSettings,
    state: watch::Sender<AgentRegistration>,
    cancel_token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        container: Arc<dyn AgentContainer>,
        coordinator: Arc<CacheCoordinator>,
        environment: Environment,
    ) -> Self {
        Self::with_settings(container, coordinator, environment, LifecycleSettings::default())
    }

    pub fn with_settings(
        container: Arc<dyn AgentContainer>,
        coordinator: Arc<CacheCoordinator>,
        environment: Environment,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            container,
            coordinator,
            environment,
            settings,
            state: watch::channel(AgentRegistration::Unregistered).0,
            cancel_token: CancellationToken::new(),
            listener: Mutex::new(None),
        }
    }

    /// Current lifecycle state of the agent relative to this page
    pub fn state(&self) -> AgentRegistration {
        *self.state.borrow()
    }

    pub fn mode(&self) -> AgentMode {
        self.environment.mode()
    }

    /// Returns true while the signal listener task is running
    pub async fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Performs the one-time agent setup
    ///
    /// Never fails: every error is logged and reflected in the outcome.
    pub async fn setup(self: &Arc<Self>) -> SetupOutcome {
        if !self.container.is_supported() {
            tracing::debug!("Background agents not supported; skipping setup");
            return SetupOutcome::Unsupported;
        }

        match self.mode() {
            AgentMode::Development => self.setup_development().await,
            AgentMode::Production => self.setup_production().await,
        }
    }

    async fn setup_development(&self) -> SetupOutcome {
        tracing::info!("Development mode: removing registered agents");

        let registrations = match self.container.registrations().await {
            Ok(registrations) => registrations,
            Err(e) => {
                tracing::warn!("Failed to list agent registrations: {}", e);
                Vec::new()
            }
        };

        let mut unregistered = 0;
        for registration in registrations {
            match registration.unregister().await {
                Ok(true) => {
                    tracing::info!("Unregistered agent for scope {}", registration.scope());
                    unregistered += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    "Failed to unregister agent for scope {}: {}",
                    registration.scope(),
                    e
                ),
            }
        }

        self.set_state(AgentRegistration::Unregistered);
        SetupOutcome::Development { unregistered }
    }

    async fn setup_production(self: &Arc<Self>) -> SetupOutcome {
        // Subscribe first so signals raised during registration are kept
        let signals = self.container.subscribe();
        self.set_state(AgentRegistration::Registering);

        let script_url = self
            .coordinator
            .tokens()
            .append_to_url(&self.settings.script_path, Some(&CacheBustToken::generate()));

        let outcome = match self.container.register(&script_url, &self.settings.scope).await {
            Ok(registration) => {
                tracing::info!(
                    "Registered agent {} for scope {}",
                    registration.script_url(),
                    registration.scope()
                );
                let state = if self.container.has_controller() {
                    AgentRegistration::ActiveControlling
                } else {
                    AgentRegistration::ActiveNotControlling
                };
                self.set_state(state);
                SetupOutcome::Registered
            }
            Err(e) => {
                tracing::warn!("Agent registration failed: {}", e);
                // An agent from an earlier visit may still control the page
                let state = if self.container.has_controller() {
                    AgentRegistration::ActiveControlling
                } else {
                    AgentRegistration::Unregistered
                };
                self.set_state(state);
                SetupOutcome::RegistrationFailed(e.to_string())
            }
        };

        // Messages from a controlling agent are relayed even if registration failed
        self.spawn_listener(signals).await;
        outcome
    }

    async fn spawn_listener(self: &Arc<Self>, mut signals: broadcast::Receiver<LifecycleSignal>) {
        let manager = Arc::clone(self);
        let cancel_token = self.cancel_token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = signals.recv() => match received {
                        Ok(signal) => manager.handle_signal(signal).await,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("Lifecycle listener skipped {} signals", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = cancel_token.cancelled() => {
                        tracing::info!("Lifecycle listener cancelled");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.listener.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Reacts to one lifecycle signal
    pub async fn handle_signal(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::UpdateFound => {
                self.set_state(AgentRegistration::UpdateFound);
                tracing::info!("Agent update found; clearing agent caches");

                match self.coordinator.request_agent_clear_caches().await {
                    Delivery::Sent => {}
                    other => tracing::warn!("Update-triggered cache clear not delivered: {:?}", other),
                }
            }
            LifecycleSignal::UpdateActivated => {
                self.set_state(AgentRegistration::UpdateActivated);
                tracing::info!("New agent version available; it applies on the next navigation");
            }
            LifecycleSignal::ControllerChange => {
                self.set_state(AgentRegistration::ActiveControlling);
                tracing::debug!("Agent controller changed");
                self.coordinator.relay_controller_change();
            }
            LifecycleSignal::Message(event) => {
                tracing::debug!("Agent message: {:?}", event);
                self.coordinator.relay_agent_event(&event);
            }
        }
    }

    /// Stops the signal listener
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.listener.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Lifecycle listener ended abnormally: {}", e);
            }
        }
    }

    fn set_state(&self, state: AgentRegistration) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!("Agent state {:?} -> {:?}", *current, state);
            *current = state;
            true
        });
    }
}
