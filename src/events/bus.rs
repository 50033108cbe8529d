//! Page event types and sinks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Event name for URL invalidations
pub const CACHE_INVALIDATE: &str = "cache-invalidate";
/// Event name for a change of the controlling agent
pub const CACHE_CONTROLLER_CHANGE: &str = "cache-controller-change";
/// Event name for a completed full clear
pub const CACHE_CLEARED: &str = "cache-cleared";

const DEFAULT_CAPACITY: usize = 64;

/// Errors that can occur while dispatching a page event
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The sink has been shut down
    #[error("Event sink is closed")]
    Closed,

    /// No dispatch mechanism exists in this context
    #[error("Event dispatch unavailable: {0}")]
    Unavailable(String),
}

/// Events re-published to the rest of the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// Cached data for these URLs is no longer valid
    CacheInvalidate { urls: Vec<String> },
    /// A different agent instance now controls the page
    ControllerChange,
    /// The agent dropped all of its caches
    CacheCleared,
}

impl PageEvent {
    /// Event type name
    pub fn name(&self) -> &'static str {
        match self {
            PageEvent::CacheInvalidate { .. } => CACHE_INVALIDATE,
            PageEvent::ControllerChange => CACHE_CONTROLLER_CHANGE,
            PageEvent::CacheCleared => CACHE_CLEARED,
        }
    }

    /// Event detail payload, if the event carries one
    pub fn detail(&self) -> Option<Value> {
        match self {
            PageEvent::CacheInvalidate { urls } => Some(json!({ "urls": urls })),
            PageEvent::ControllerChange | PageEvent::CacheCleared => None,
        }
    }

    /// Generic message form used for cross-context posts
    pub fn to_message(&self) -> Value {
        match self.detail() {
            Some(detail) => json!({ "type": self.name(), "detail": detail }),
            None => json!({ "type": self.name() }),
        }
    }
}

/// Something that can deliver page events
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: &PageEvent) -> Result<(), DispatchError>;
}

/// In-page event bus backed by a broadcast channel
///
/// Dispatching with no subscribers succeeds; nobody was listening. Only a
/// closed bus reports failure.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PageEvent>,
    closed: Arc<AtomicBool>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus buffering up to `capacity` events per slow subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribes to all subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.sender.subscribe()
    }

    /// Stops accepting events
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn dispatch(&self, event: &PageEvent) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }

        match self.sender.send(event.clone()) {
            Ok(count) => tracing::trace!("Dispatched {} to {} subscribers", event.name(), count),
            Err(_) => tracing::trace!("Dispatched {} with no subscribers", event.name()),
        }
        Ok(())
    }
}

/// Secondary delivery path posting generic JSON messages to another context
#[derive(Debug, Clone)]
pub struct PostMessageSink {
    sender: mpsc::UnboundedSender<Value>,
}

impl PostMessageSink {
    /// Creates the sink together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for PostMessageSink {
    fn dispatch(&self, event: &PageEvent) -> Result<(), DispatchError> {
        self.sender
            .send(event.to_message())
            .map_err(|_| DispatchError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_event_names() {
        assert_eq!(PageEvent::CacheInvalidate { urls: vec![] }.name(), "cache-invalidate");
        assert_eq!(PageEvent::ControllerChange.name(), "cache-controller-change");
        assert_eq!(PageEvent::CacheCleared.name(), "cache-cleared");
    }

    #[test]
    fn test_page_event_detail() {
        let event = PageEvent::CacheInvalidate {
            urls: vec!["/api/poses".into()],
        };
        assert_eq!(event.detail(), Some(json!({ "urls": ["/api/poses"] })));
        assert_eq!(PageEvent::ControllerChange.detail(), None);
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.dispatch(&PageEvent::CacheCleared).unwrap();
        assert_eq!(rx.recv().await.unwrap(), PageEvent::CacheCleared);
    }

    #[test]
    fn test_event_bus_without_subscribers_is_ok() {
        let bus = EventBus::new();
        assert!(bus.dispatch(&PageEvent::CacheCleared).is_ok());
    }

    #[test]
    fn test_closed_event_bus_rejects() {
        let bus = EventBus::new();
        bus.close();
        assert_eq!(
            bus.dispatch(&PageEvent::ControllerChange),
            Err(DispatchError::Closed)
        );
    }

    #[tokio::test]
    async fn test_post_message_sink() {
        let (sink, mut rx) = PostMessageSink::channel();
        sink.dispatch(&PageEvent::CacheInvalidate {
            urls: vec!["/api/flows".into()],
        })
        .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(
            message,
            json!({ "type": "cache-invalidate", "detail": { "urls": ["/api/flows"] } })
        );

        drop(rx);
        assert_eq!(
            sink.dispatch(&PageEvent::CacheCleared),
            Err(DispatchError::Closed)
        );
    }
}
