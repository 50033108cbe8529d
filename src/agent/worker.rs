//! Cache agent - The long-lived worker that owns the response cache
//!
//! Runs as its own task, draining an inbox of control messages in send
//! order. It is the only writer of cache contents; the page reaches it
//! through messages and observes it through broadcast notifications.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::base::{AgentError, AgentStatus, Envelope, LifecycleSignal};
use crate::cache::{CacheError, CacheSelector, CacheStorage, CachedResponse};
use crate::protocol::{AgentEvent, AgentReply, ControlMessage, VersionInfo};

/// Suffix for buckets holding responses that fit no category
const PAGES_BUCKET: &str = "pages";

/// Background agent owning the cache buckets of one cache version
pub struct CacheAgent {
    version: String,
    cache_version: String,
    caches: Arc<dyn CacheStorage>,
    clients: broadcast::Sender<LifecycleSignal>,
    status: RwLock<AgentStatus>,
    cancel_token: CancellationToken,
}

impl CacheAgent {
    /// Creates an agent that notifies pages through `clients`
    pub fn new(
        version: impl Into<String>,
        cache_version: impl Into<String>,
        caches: Arc<dyn CacheStorage>,
        clients: broadcast::Sender<LifecycleSignal>,
    ) -> Self {
        Self {
            version: version.into(),
            cache_version: cache_version.into(),
            caches,
            clients,
            status: RwLock::new(AgentStatus::Idle),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn cache_version(&self) -> &str {
        &self.cache_version
    }

    /// Builds a fresh version reply
    pub fn version_info(&self) -> VersionInfo {
        VersionInfo::new(&self.version, &self.cache_version)
    }

    /// Returns the current status of the agent
    pub fn status(&self) -> AgentStatus {
        self.status
            .try_read()
            .map(|s| *s)
            .unwrap_or(AgentStatus::Idle)
    }

    /// Bucket a response for `url` is stored in
    pub fn bucket_for(&self, url: &str) -> String {
        let category = CacheSelector::classify(url)
            .map(|c| c.as_str())
            .unwrap_or(PAGES_BUCKET);
        format!("{}-{}", self.cache_version, category)
    }

    /// Stores a fetched response in the matching bucket
    pub async fn cache_response(
        &self,
        url: &str,
        response: CachedResponse,
    ) -> Result<(), CacheError> {
        let bucket = self.bucket_for(url);
        self.caches.put(&bucket, url, response).await
    }

    /// Deletes buckets left behind by other cache versions
    ///
    /// Returns the number of buckets removed.
    pub async fn activate(&self) -> usize {
        let prefix = format!("{}-", self.cache_version);
        let names = match self.caches.bucket_names().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Agent {} could not list buckets on activate: {}", self.version, e);
                return 0;
            }
        };

        let mut removed = 0;
        for name in names.into_iter().filter(|n| !n.starts_with(&prefix)) {
            match self.caches.delete_bucket(&name).await {
                Ok(true) => {
                    tracing::debug!("Removed stale cache bucket {}", name);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to remove stale bucket {}: {}", name, e),
            }
        }

        tracing::info!("Agent {} activated ({} stale buckets removed)", self.version, removed);
        removed
    }

    /// Handles one control message
    pub async fn handle(&self, envelope: Envelope) {
        let Envelope { message, reply } = envelope;
        tracing::debug!("Agent {} received {}", self.version, message.command());
        if reply.is_none() && message.expects_reply() {
            tracing::warn!("{} received without a reply port", message.command());
        }

        let answer = match message {
            ControlMessage::ClearAllCaches => {
                self.clear_all().await;
                let event = AgentEvent::cache_cleared_now();
                self.notify(event.clone());
                AgentReply::Event(event)
            }
            ControlMessage::InvalidateUrls { urls } => {
                let removed = self.invalidate(&urls).await;
                tracing::debug!("Invalidated {} cached entries for {} URLs", removed, urls.len());
                let event = AgentEvent::UrlsInvalidated { urls };
                self.notify(event.clone());
                AgentReply::Event(event)
            }
            ControlMessage::GetVersion => AgentReply::Version(self.version_info()),
        };

        if let Some(port) = reply {
            if port.send(answer).is_err() {
                tracing::debug!("Reply port closed before the agent answered");
            }
        }
    }

    /// Runs the message loop until the inbox closes or the agent is stopped
    pub async fn run(&self, mut inbox: mpsc::UnboundedReceiver<Envelope>) -> Result<(), AgentError> {
        {
            let status = self.status.read().await;
            if status.is_running() {
                return Err(AgentError::AlreadyRunning);
            }
        }

        *self.status.write().await = AgentStatus::Running;

        loop {
            tokio::select! {
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => break,
                },
                _ = self.cancel_token.cancelled() => {
                    tracing::info!("Agent {} cancelled", self.version);
                    break;
                }
            }
        }

        *self.status.write().await = AgentStatus::Stopped;
        Ok(())
    }

    /// Signals the message loop to stop
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    async fn clear_all(&self) {
        let names = match self.caches.bucket_names().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Agent {} could not list buckets to clear: {}", self.version, e);
                return;
            }
        };

        for name in names {
            if let Err(e) = self.caches.delete_bucket(&name).await {
                tracing::warn!("Failed to delete cache bucket {}: {}", name, e);
            }
        }
    }

    async fn invalidate(&self, urls: &[String]) -> usize {
        let targets: Vec<&str> = urls.iter().map(|u| without_query(u)).collect();
        let names = match self.caches.bucket_names().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Agent {} could not list buckets to invalidate: {}", self.version, e);
                return 0;
            }
        };

        let mut removed = 0;
        for name in names {
            let requests = match self.caches.requests(&name).await {
                Ok(requests) => requests,
                Err(e) => {
                    tracing::warn!("Failed to list entries of {}: {}", name, e);
                    continue;
                }
            };

            for request in requests {
                if targets.contains(&without_query(&request)) {
                    match self.caches.delete_entry(&name, &request).await {
                        Ok(true) => removed += 1,
                        Ok(false) => {}
                        Err(e) => tracing::warn!("Failed to delete {} from {}: {}", request, name, e),
                    }
                }
            }
        }
        removed
    }

    fn notify(&self, event: AgentEvent) {
        // Err only means no page is listening
        let _ = self.clients.send(LifecycleSignal::Message(event));
    }
}

/// Entries match regardless of cache-bust or other query parameters
fn without_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use tokio::sync::oneshot;

    fn agent() -> (Arc<MemoryCacheStorage>, broadcast::Receiver<LifecycleSignal>, CacheAgent) {
        let caches = Arc::new(MemoryCacheStorage::new());
        let (clients, rx) = broadcast::channel(16);
        let agent = CacheAgent::new("1.2.0", "flowcache-v2", caches.clone(), clients);
        (caches, rx, agent)
    }

    #[test]
    fn test_bucket_for() {
        let (_, _, agent) = agent();
        assert_eq!(agent.bucket_for("https://yoga.test/api/poses"), "flowcache-v2-api");
        assert_eq!(agent.bucket_for("https://yoga.test/img/a.png"), "flowcache-v2-images");
        assert_eq!(agent.bucket_for("https://yoga.test/app.js"), "flowcache-v2-assets");
        assert_eq!(agent.bucket_for("https://yoga.test/practice"), "flowcache-v2-pages");
    }

    #[tokio::test]
    async fn test_get_version_replies_on_port() {
        let (_, _, agent) = agent();
        let (tx, rx) = oneshot::channel();

        agent
            .handle(Envelope {
                message: ControlMessage::GetVersion,
                reply: Some(tx),
            })
            .await;

        match rx.await.unwrap() {
            AgentReply::Version(info) => {
                assert_eq!(info.version, "1.2.0");
                assert_eq!(info.cache_version, "flowcache-v2");
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_all_drops_buckets_and_notifies() {
        let (caches, mut rx, agent) = agent();
        agent
            .cache_response("https://yoga.test/api/poses", CachedResponse::ok("[]"))
            .await
            .unwrap();
        agent
            .cache_response("https://yoga.test/img/a.png", CachedResponse::ok(""))
            .await
            .unwrap();

        agent
            .handle(Envelope {
                message: ControlMessage::ClearAllCaches,
                reply: None,
            })
            .await;

        assert_eq!(caches.entry_count().await, 0);
        assert!(matches!(
            rx.recv().await.unwrap(),
            LifecycleSignal::Message(AgentEvent::CacheCleared { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalidate_ignores_query_string() {
        let (caches, mut rx, agent) = agent();
        agent
            .cache_response("https://yoga.test/api/poses?_cb=cb_1_x", CachedResponse::ok("[]"))
            .await
            .unwrap();
        agent
            .cache_response("https://yoga.test/api/flows", CachedResponse::ok("[]"))
            .await
            .unwrap();

        let urls = vec!["https://yoga.test/api/poses".to_string()];
        agent
            .handle(Envelope {
                message: ControlMessage::InvalidateUrls { urls: urls.clone() },
                reply: None,
            })
            .await;

        assert_eq!(
            caches.requests("flowcache-v2-api").await.unwrap(),
            vec!["https://yoga.test/api/flows"]
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            LifecycleSignal::Message(AgentEvent::UrlsInvalidated { urls })
        );
    }

    #[tokio::test]
    async fn test_activate_removes_other_versions() {
        let (caches, _, agent) = agent();
        caches.put("flowcache-v1-api", "/api/poses", CachedResponse::ok("")).await.unwrap();
        caches.put("flowcache-v2-api", "/api/poses", CachedResponse::ok("")).await.unwrap();

        assert_eq!(agent.activate().await, 1);
        assert_eq!(caches.bucket_names().await.unwrap(), vec!["flowcache-v2-api"]);
    }

    #[tokio::test]
    async fn test_run_processes_until_stopped() {
        let (_, _, agent) = agent();
        let agent = Arc::new(agent);
        let (tx, inbox) = mpsc::unbounded_channel();

        let runner = agent.clone();
        let handle = tokio::spawn(async move { runner.run(inbox).await });

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Envelope {
            message: ControlMessage::GetVersion,
            reply: Some(reply_tx),
        })
        .unwrap();
        assert!(matches!(reply_rx.await.unwrap(), AgentReply::Version(_)));
        assert!(agent.status().is_running());

        agent.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(agent.status(), AgentStatus::Stopped);
    }
}
