//! flowcache - Cache coordination between a web page and its background agent
//!
//! A long-lived background agent owns the response cache for an origin.
//! Foreground page code never touches cache contents directly; it asks the
//! agent through a typed control channel and reacts to the notifications
//! the agent sends back.
//!
//! ## Features
//!
//! - Targeted URL invalidation and category-based clears
//! - Full clears across every storage tier, followed by a network prime
//! - Agent version checks bounded by a timeout
//! - A persisted cache-bust token appended to URLs and the agent script
//! - Development/production agent lifecycle handling
//!
//! ## Architecture
//!
//! - **Token**: the durable cache-bust token (`TokenStore`)
//! - **Coordinator**: the page-side API (`CacheCoordinator`)
//! - **Lifecycle**: agent registration and monitoring (`LifecycleManager`)
//! - **Agent**: the background worker and its platform container
//! - **Events**: page-local rebroadcast of agent notifications
//! - **Storage / Cache**: key/value tiers and named response buckets

pub mod agent;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod lifecycle;
pub mod protocol;
pub mod storage;
pub mod token;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::EnvFilter;

use agent::InProcessContainer;
use config::{CacheConfig, ConfigError};
use coordinator::{CacheCoordinator, HttpPrimer, LoggingReloader, PageServices};
use events::{EventBus, EventRelay, PostMessageSink};
use lifecycle::{Environment, LifecycleManager, SetupOutcome};
use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
use token::TokenStore;

const DEFAULT_LOG_FILTER: &str = "flowcache=debug,info";

/// Initializes logging
///
/// `RUST_LOG` takes precedence over the default filter. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Errors that can occur assembling the cache layer
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open durable storage: {0}")]
    Storage(#[from] StorageError),
}

/// Application state for one page: coordinator, lifecycle and event bus
pub struct CacheLayer {
    config: CacheConfig,
    container: Arc<InProcessContainer>,
    coordinator: Arc<CacheCoordinator>,
    lifecycle: Arc<LifecycleManager>,
    events: EventBus,
    posted: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

impl CacheLayer {
    /// Wires the layer against an in-process agent container
    pub fn in_process(
        config: CacheConfig,
        container: Arc<InProcessContainer>,
    ) -> Result<Self, SetupError> {
        let origin = config.origin_url()?;

        let durable: Arc<dyn KeyValueStore> = match &config.durable_store {
            Some(path) => Arc::new(FileStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        let tokens = Arc::new(
            TokenStore::new(durable.clone(), origin.clone())
                .with_names(config.token_key.clone(), config.token_param.clone()),
        );

        let events = EventBus::new();
        let (fallback, posted) = PostMessageSink::channel();
        let relay = EventRelay::new(Arc::new(events.clone())).with_fallback(Arc::new(fallback));

        let services = PageServices {
            transport: container.clone(),
            durable,
            session: Arc::new(MemoryStore::new()),
            caches: container.caches(),
            network: Arc::new(HttpPrimer::new()),
            reloader: Arc::new(LoggingReloader),
        };
        let coordinator = Arc::new(
            CacheCoordinator::new(origin.clone(), services, tokens, relay)
                .with_settings(config.coordinator_settings()),
        );

        let lifecycle = Arc::new(LifecycleManager::with_settings(
            container.clone(),
            coordinator.clone(),
            Environment::new(origin, config.debug),
            config.lifecycle_settings(),
        ));

        Ok(Self {
            config,
            container,
            coordinator,
            lifecycle,
            events,
            posted: Mutex::new(Some(posted)),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn container(&self) -> &Arc<InProcessContainer> {
        &self.container
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Page event bus UI code subscribes to
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Takes the receiving end of the cross-context fallback channel
    pub async fn take_posted_messages(&self) -> Option<mpsc::UnboundedReceiver<Value>> {
        self.posted.lock().await.take()
    }

    /// Runs agent setup for the page
    pub async fn start(&self) -> SetupOutcome {
        tracing::info!("Starting cache layer for {}", self.coordinator.origin());
        self.lifecycle.setup().await
    }

    /// Stops lifecycle monitoring and the controlling agent
    pub async fn shutdown(&self) {
        self.lifecycle.stop().await;
        if let Some(agent) = self.container.controller() {
            agent.stop();
        }
        tracing::info!("Cache layer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistration;
    use crate::cache::CachedResponse;
    use crate::coordinator::Delivery;
    use crate::events::PageEvent;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn production_layer() -> CacheLayer {
        let config = CacheConfig {
            origin: "https://yoga.test".to_string(),
            ..CacheConfig::default()
        };
        let container = Arc::new(InProcessContainer::new("1.0.0", "flowcache-v1"));
        CacheLayer::in_process(config, container).unwrap()
    }

    async fn next_matching(
        events: &mut broadcast::Receiver<PageEvent>,
        wanted: impl Fn(&PageEvent) -> bool,
    ) -> PageEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = events.recv().await.unwrap();
                if wanted(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalidation_echo_becomes_page_event() {
        let layer = production_layer();
        let mut events = layer.events().subscribe();

        assert_eq!(layer.start().await, SetupOutcome::Registered);
        assert!(layer.coordinator().has_agent());

        let delivery = layer.coordinator().invalidate_urls(&["/api/poses"]).await;
        assert_eq!(delivery, Delivery::Sent);

        let event = next_matching(&mut events, |e| {
            matches!(e, PageEvent::CacheInvalidate { .. })
        })
        .await;
        assert_eq!(
            event,
            PageEvent::CacheInvalidate {
                urls: vec!["https://yoga.test/api/poses".to_string()]
            }
        );

        layer.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalidation_removes_cached_entry() {
        let layer = production_layer();
        layer.start().await;

        let agent = layer.container().controller().unwrap();
        agent
            .cache_response("https://yoga.test/api/poses?_cb=cb_1_abc", CachedResponse::ok("[]"))
            .await
            .unwrap();
        agent
            .cache_response("https://yoga.test/styles/main.css", CachedResponse::ok("body{}"))
            .await
            .unwrap();
        let caches = layer.container().caches();
        assert_eq!(caches.entry_count().await, 2);

        let mut events = layer.events().subscribe();
        layer.coordinator().invalidate_api_cache().await;
        next_matching(&mut events, |e| matches!(e, PageEvent::CacheInvalidate { .. })).await;

        assert_eq!(caches.entry_count().await, 1);
        assert!(caches.has_bucket(&agent.bucket_for("/styles/main.css")).await);

        layer.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_triggers_agent_clear() {
        let layer = production_layer();
        layer.start().await;
        let token = layer.coordinator().tokens().get_or_create();
        let mut events = layer.events().subscribe();

        layer
            .container()
            .install_update("1.1.0", "flowcache-v2")
            .await
            .unwrap();

        next_matching(&mut events, |e| *e == PageEvent::CacheCleared).await;
        assert_ne!(layer.coordinator().tokens().current(), Some(token));
        assert_eq!(
            layer.coordinator().get_agent_version().await.map(|v| v.version),
            Some("1.1.0".to_string())
        );
        assert!(layer.lifecycle().state().is_active());

        layer.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_version_requests_get_own_replies() {
        let layer = production_layer();
        layer.start().await;

        let coordinator = layer.coordinator();
        let (first, second) = tokio::join!(
            coordinator.get_agent_version(),
            coordinator.get_agent_version()
        );

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.version, "1.0.0");
        assert_eq!(second.cache_version, "flowcache-v1");

        layer.shutdown().await;
    }

    #[tokio::test]
    async fn test_development_layer_never_registers() {
        let config = CacheConfig {
            origin: "http://localhost:5173".to_string(),
            debug: true,
            ..CacheConfig::default()
        };
        let container = Arc::new(InProcessContainer::new("1.0.0", "flowcache-v1"));
        let layer = CacheLayer::in_process(config, container).unwrap();

        assert_eq!(
            layer.start().await,
            SetupOutcome::Development { unregistered: 0 }
        );
        assert_eq!(layer.container().register_calls(), 0);
        assert_eq!(layer.lifecycle().state(), AgentRegistration::Unregistered);
        assert!(!layer.coordinator().has_agent());
    }

    #[tokio::test]
    async fn test_fallback_receiver_taken_once() {
        let layer = production_layer();
        assert!(layer.take_posted_messages().await.is_some());
        assert!(layer.take_posted_messages().await.is_none());
    }

    #[test]
    fn test_invalid_origin_is_rejected() {
        let config = CacheConfig {
            origin: "nope".to_string(),
            ..CacheConfig::default()
        };
        let container = Arc::new(InProcessContainer::new("1.0.0", "flowcache-v1"));
        assert!(matches!(
            CacheLayer::in_process(config, container),
            Err(SetupError::Config(_))
        ));
    }

    #[test]
    fn test_durable_store_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = CacheConfig {
            origin: "https://yoga.test".to_string(),
            durable_store: Some(dir.path().join("durable.json")),
            ..CacheConfig::default()
        };
        let container = Arc::new(InProcessContainer::new("1.0.0", "flowcache-v1"));
        let layer = CacheLayer::in_process(config, container).unwrap();

        let token = layer.coordinator().tokens().get_or_create();
        let reopened = FileStore::open(dir.path().join("durable.json")).unwrap();
        assert_eq!(
            reopened.get("cache_bust_token").unwrap(),
            Some(token.as_str().to_string())
        );
    }
}
