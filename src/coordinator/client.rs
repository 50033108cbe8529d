//! Cache coordinator - Page-side control of the agent's caches
//!
//! Every operation tolerates a missing agent and never returns an error to
//! the caller. Failures are logged with the operation and target, and the
//! page is left usable without a cache rather than blocked.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use url::Url;

use super::network::{NetworkPrimer, PageReloader};
use super::outcome::{ClearReport, Delivery, VersionCheck};
use crate::agent::AgentTransport;
use crate::cache::{CacheSelector, CacheStorage};
use crate::events::{EventRelay, PageEvent};
use crate::protocol::{AgentEvent, AgentReply, ControlMessage, VersionInfo};
use crate::storage::KeyValueStore;
use crate::token::TokenStore;

/// Pose, series, sequence and flow listings
pub const YOGA_DATA_URLS: &[&str] = &["/api/poses", "/api/series", "/api/sequences", "/api/flows"];

/// Current user profile and preferences
pub const USER_URLS: &[&str] = &["/api/user", "/api/user/profile", "/api/user/preferences"];

/// Practice log and activity history
pub const PRACTICE_URLS: &[&str] = &["/api/practice", "/api/practice/history", "/api/activity"];

/// Tunables for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Pause between starting the clears and reloading in `hard_refresh`
    pub reload_delay: Duration,
    /// How long `get_agent_version` waits for a reply
    pub version_timeout: Duration,
    /// Hard refresh automatically when the agent version changes
    pub auto_refresh_on_version_change: bool,
    /// Path fetched with no-cache directives after a full clear
    pub prime_path: String,
    /// Session key holding the last agent version seen
    pub version_key: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            reload_delay: Duration::from_millis(100),
            version_timeout: Duration::from_secs(5),
            auto_refresh_on_version_change: false,
            prime_path: "/".to_string(),
            version_key: "sw_version".to_string(),
        }
    }
}

/// Platform capabilities the coordinator works through
pub struct PageServices {
    /// Control channel to the controlling agent
    pub transport: Arc<dyn AgentTransport>,
    /// Durable per-origin key/value tier
    pub durable: Arc<dyn KeyValueStore>,
    /// Session-scoped key/value tier
    pub session: Arc<dyn KeyValueStore>,
    /// Cache buckets exposed by the platform
    pub caches: Arc<dyn CacheStorage>,
    pub network: Arc<dyn NetworkPrimer>,
    pub reloader: Arc<dyn PageReloader>,
}

/// Page-side API for invalidating, clearing and versioning the agent cache
pub struct CacheCoordinator {
    origin: Url,
    services: PageServices,
    tokens: Arc<TokenStore>,
    relay: EventRelay,
    settings: CoordinatorSettings,
}

impl CacheCoordinator {
    /// Creates a coordinator with default settings
    pub fn new(
        origin: Url,
        services: PageServices,
        tokens: Arc<TokenStore>,
        relay: EventRelay,
    ) -> Self {
        Self {
            origin,
            services,
            tokens,
            relay,
            settings: CoordinatorSettings::default(),
        }
    }

    /// Replaces the settings
    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Returns true if an agent controls the page
    pub fn has_agent(&self) -> bool {
        self.services.transport.has_controller()
    }

    /// Resolves `url` against the page origin
    pub fn normalize(&self, url: &str) -> Option<String> {
        match self.origin.join(url.trim()) {
            Ok(resolved) => Some(resolved.to_string()),
            Err(e) => {
                tracing::warn!("invalidate_urls: skipping unparsable URL '{}': {}", url, e);
                None
            }
        }
    }

    /// Asks the agent to drop cached responses for `urls`
    ///
    /// Best-effort: `Delivery::Sent` means the message was queued, not that
    /// the entries are gone.
    pub async fn invalidate_urls<S: AsRef<str>>(&self, urls: &[S]) -> Delivery {
        if !self.has_agent() {
            tracing::debug!("invalidate_urls: no active agent, skipping {} URLs", urls.len());
            return Delivery::NoAgent;
        }

        let urls: Vec<String> = urls
            .iter()
            .filter_map(|url| self.normalize(url.as_ref()))
            .collect();

        if urls.is_empty() {
            return Delivery::NothingToSend;
        }

        let count = urls.len();
        match self
            .services
            .transport
            .post(ControlMessage::InvalidateUrls { urls }, None)
        {
            Ok(()) => {
                tracing::debug!("Requested invalidation of {} URLs", count);
                Delivery::Sent
            }
            Err(e) => {
                tracing::warn!("invalidate_urls: failed to post to agent: {}", e);
                Delivery::Failed(e.to_string())
            }
        }
    }

    /// Invalidates every API listing the app caches
    pub async fn invalidate_api_cache(&self) -> Delivery {
        let urls: Vec<&str> = YOGA_DATA_URLS
            .iter()
            .chain(USER_URLS)
            .chain(PRACTICE_URLS)
            .copied()
            .collect();
        self.invalidate_urls(&urls).await
    }

    /// Invalidates pose, series, sequence and flow data
    pub async fn invalidate_yoga_data_cache(&self) -> Delivery {
        self.invalidate_urls(YOGA_DATA_URLS).await
    }

    /// Invalidates the current user's profile data
    pub async fn invalidate_user_cache(&self) -> Delivery {
        self.invalidate_urls(USER_URLS).await
    }

    /// Invalidates practice log and activity history
    pub async fn invalidate_practice_cache(&self) -> Delivery {
        self.invalidate_urls(PRACTICE_URLS).await
    }

    /// Wipes every page-visible storage tier, then primes the network
    ///
    /// Steps run in order and independently: durable storage, session
    /// storage, cache buckets, no-cache request. A failing step is logged and
    /// the next one still runs.
    pub async fn clear_all_caches(&self) -> ClearReport {
        let mut report = ClearReport::default();

        match self.services.durable.clear() {
            Ok(()) => report.durable_cleared = true,
            Err(e) => tracing::warn!("clear_all_caches: durable storage: {}", e),
        }

        match self.services.session.clear() {
            Ok(()) => report.session_cleared = true,
            Err(e) => tracing::warn!("clear_all_caches: session storage: {}", e),
        }

        match self.services.caches.bucket_names().await {
            Ok(names) => {
                for name in names {
                    match self.services.caches.delete_bucket(&name).await {
                        Ok(true) => report.buckets_deleted += 1,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!("clear_all_caches: bucket {}: {}", name, e);
                            report.bucket_failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("clear_all_caches: listing cache buckets: {}", e);
                report.bucket_failures += 1;
            }
        }

        match self.origin.join(&self.settings.prime_path) {
            Ok(url) => match self.services.network.prime(url.as_str()).await {
                Ok(status) => {
                    tracing::debug!("Primed {} ({})", url, status);
                    report.primed = true;
                }
                Err(e) => tracing::warn!("clear_all_caches: priming {}: {}", url, e),
            },
            Err(e) => tracing::warn!(
                "clear_all_caches: invalid prime path '{}': {}",
                self.settings.prime_path,
                e
            ),
        }

        tracing::info!(
            "Cleared caches (durable: {}, session: {}, buckets: {}, primed: {})",
            report.durable_cleared,
            report.session_cleared,
            report.buckets_deleted,
            report.primed
        );
        report
    }

    /// Tells the agent to drop all of its caches
    ///
    /// A reply channel is attached so the agent can acknowledge, but the
    /// call does not wait for it. The cache-bust token is regenerated with
    /// every clear that is sent.
    pub async fn request_agent_clear_caches(&self) -> Delivery {
        if !self.has_agent() {
            tracing::debug!("request_agent_clear_caches: no active agent");
            return Delivery::NoAgent;
        }

        let (reply, acknowledgment) = oneshot::channel();
        match self
            .services
            .transport
            .post(ControlMessage::ClearAllCaches, Some(reply))
        {
            Ok(()) => {
                let wait = self.settings.version_timeout;
                tokio::spawn(async move {
                    match tokio::time::timeout(wait, acknowledgment).await {
                        Ok(Ok(reply)) => tracing::debug!("Agent acknowledged cache clear: {:?}", reply),
                        Ok(Err(_)) => tracing::debug!("Agent closed the clear reply channel"),
                        Err(_) => tracing::debug!("No acknowledgment for cache clear"),
                    }
                });

                self.tokens.regenerate();
                Delivery::Sent
            }
            Err(e) => {
                tracing::warn!("request_agent_clear_caches: failed to post to agent: {}", e);
                Delivery::Failed(e.to_string())
            }
        }
    }

    /// Asks the agent for its version
    ///
    /// Resolves exactly once: with the reply, or `None` if no agent controls
    /// the page, the reply channel is dropped, or no reply arrives within
    /// `version_timeout`.
    pub async fn get_agent_version(&self) -> Option<VersionInfo> {
        if !self.has_agent() {
            tracing::debug!("get_agent_version: no active agent");
            return None;
        }

        let (reply, response) = oneshot::channel();
        if let Err(e) = self
            .services
            .transport
            .post(ControlMessage::GetVersion, Some(reply))
        {
            tracing::warn!("get_agent_version: failed to post to agent: {}", e);
            return None;
        }

        match tokio::time::timeout(self.settings.version_timeout, response).await {
            Ok(Ok(AgentReply::Version(info))) => Some(info),
            Ok(Ok(other)) => {
                tracing::warn!("get_agent_version: unexpected reply {:?}", other);
                None
            }
            Ok(Err(_)) => {
                tracing::warn!("get_agent_version: agent dropped the reply channel");
                None
            }
            Err(_) => {
                tracing::warn!(
                    "get_agent_version: no reply within {:?}",
                    self.settings.version_timeout
                );
                None
            }
        }
    }

    /// Deletes cached entries of one content category across all buckets
    ///
    /// Returns the number of entries deleted.
    pub async fn clear_cache_by_category(&self, selector: CacheSelector) -> usize {
        let names = match self.services.caches.bucket_names().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("clear_cache_by_category({}): listing buckets: {}", selector, e);
                return 0;
            }
        };

        let mut deleted = 0;
        for name in names {
            let requests = match self.services.caches.requests(&name).await {
                Ok(requests) => requests,
                Err(e) => {
                    tracing::warn!("clear_cache_by_category({}): bucket {}: {}", selector, name, e);
                    continue;
                }
            };

            for url in requests.iter().filter(|url| selector.matches(url)) {
                match self.services.caches.delete_entry(&name, url).await {
                    Ok(true) => deleted += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(
                        "clear_cache_by_category({}): deleting {} from {}: {}",
                        selector,
                        url,
                        name,
                        e
                    ),
                }
            }
        }

        tracing::info!("Cleared {} {} cache entries", deleted, selector);
        deleted
    }

    /// Clears everything, regenerates the token and reloads the page
    ///
    /// The only operation that reloads. It must be triggered by the user or
    /// an explicit event, never automatically.
    pub async fn hard_refresh(&self) {
        tracing::info!("Hard refresh requested");

        let report = self.clear_all_caches().await;
        if !report.is_complete() {
            tracing::warn!("Hard refresh continuing after partial clear: {:?}", report);
        }

        // A delivered clear already regenerated the token
        if !self.request_agent_clear_caches().await.was_sent() {
            self.tokens.regenerate();
        }

        tokio::time::sleep(self.settings.reload_delay).await;
        self.services.reloader.reload();
    }

    /// Compares the agent version with the last one seen this session
    ///
    /// A changed version regenerates the token. With
    /// `auto_refresh_on_version_change` enabled it also hard refreshes.
    pub async fn check_version(&self) -> VersionCheck {
        let Some(info) = self.get_agent_version().await else {
            return VersionCheck::Unavailable;
        };

        let key = &self.settings.version_key;
        let previous = match self.services.session.get(key) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("check_version: reading '{}': {}", key, e);
                None
            }
        };

        if let Err(e) = self.services.session.set(key, &info.version) {
            tracing::warn!("check_version: writing '{}': {}", key, e);
        }

        match previous {
            None => VersionCheck::FirstSeen(info),
            Some(previous) if previous == info.version => VersionCheck::Unchanged(info),
            Some(previous) => {
                tracing::info!("Agent version changed: {} -> {}", previous, info.version);
                self.tokens.regenerate();

                if self.settings.auto_refresh_on_version_change {
                    self.hard_refresh().await;
                }

                VersionCheck::Changed {
                    previous,
                    current: info,
                }
            }
        }
    }

    /// Re-publishes an agent notification as a page event
    ///
    /// Returns whether any sink accepted the event.
    pub fn relay_agent_event(&self, event: &AgentEvent) -> bool {
        let page_event = match event {
            AgentEvent::UrlsInvalidated { urls } => PageEvent::CacheInvalidate { urls: urls.clone() },
            AgentEvent::CacheCleared { .. } => PageEvent::CacheCleared,
        };
        self.relay.relay(&page_event)
    }

    /// Publishes a controller change as a page event
    pub fn relay_controller_change(&self) -> bool {
        self.relay.relay(&PageEvent::ControllerChange)
    }
}
