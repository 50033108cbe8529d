//! Events module - Page-local rebroadcast of agent notifications
//!
//! UI code subscribes here instead of listening to the agent transport.
//! Delivery is best-effort: the primary bus is tried first, then a
//! cross-context post sink.

mod bus;
mod relay;

pub use bus::{
    DispatchError, EventBus, EventSink, PageEvent, PostMessageSink, CACHE_CLEARED,
    CACHE_CONTROLLER_CHANGE, CACHE_INVALIDATE,
};
pub use relay::EventRelay;

#[cfg(test)]
pub use bus::MockEventSink;
