//! Primary/fallback event delivery

use std::sync::Arc;

use super::bus::{EventSink, PageEvent};

/// Delivers page events through a primary sink, falling back to a secondary
#[derive(Clone, Default)]
pub struct EventRelay {
    primary: Option<Arc<dyn EventSink>>,
    fallback: Option<Arc<dyn EventSink>>,
}

impl EventRelay {
    /// Relay with only a primary sink
    pub fn new(primary: Arc<dyn EventSink>) -> Self {
        Self {
            primary: Some(primary),
            fallback: None,
        }
    }

    /// Relay that has no page dispatch mechanism at all
    pub fn detached() -> Self {
        Self::default()
    }

    /// Sets the secondary delivery path
    pub fn with_fallback(mut self, fallback: Arc<dyn EventSink>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Delivers `event`, returning whether any sink accepted it
    pub fn relay(&self, event: &PageEvent) -> bool {
        if let Some(primary) = &self.primary {
            match primary.dispatch(event) {
                Ok(()) => return true,
                Err(e) => tracing::debug!("Primary dispatch of {} failed: {}", event.name(), e),
            }
        }

        match &self.fallback {
            Some(fallback) => match fallback.dispatch(event) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Could not deliver {}: {}", event.name(), e);
                    false
                }
            },
            None => {
                tracing::warn!("No sink available for {}", event.name());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DispatchError, EventBus, MockEventSink, PostMessageSink};

    #[test]
    fn test_relay_prefers_primary() {
        let mut primary = MockEventSink::new();
        primary.expect_dispatch().times(1).returning(|_| Ok(()));
        let mut fallback = MockEventSink::new();
        fallback.expect_dispatch().never();

        let relay = EventRelay::new(Arc::new(primary)).with_fallback(Arc::new(fallback));
        assert!(relay.relay(&PageEvent::CacheCleared));
    }

    #[test]
    fn test_relay_falls_back_when_primary_fails() {
        let bus = EventBus::new();
        bus.close();
        let (post, mut rx) = PostMessageSink::channel();

        let relay = EventRelay::new(Arc::new(bus)).with_fallback(Arc::new(post));
        assert!(relay.relay(&PageEvent::ControllerChange));
        assert_eq!(rx.try_recv().unwrap()["type"], "cache-controller-change");
    }

    #[test]
    fn test_relay_without_primary_uses_fallback() {
        let (post, mut rx) = PostMessageSink::channel();
        let relay = EventRelay::detached().with_fallback(Arc::new(post));

        assert!(relay.relay(&PageEvent::CacheCleared));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_relay_reports_undelivered() {
        let mut primary = MockEventSink::new();
        primary
            .expect_dispatch()
            .returning(|_| Err(DispatchError::Unavailable("no document".into())));

        let relay = EventRelay::new(Arc::new(primary));
        assert!(!relay.relay(&PageEvent::CacheCleared));
        assert!(!EventRelay::detached().relay(&PageEvent::CacheCleared));
    }
}
