//! Agent module - The background caching agent and its platform container
//!
//! Provides:
//! - The typed control channel (`AgentTransport`) used by the page
//! - The platform container API for registering agents (`AgentContainer`)
//! - `CacheAgent`, the long-lived worker that owns the response cache
//! - `InProcessContainer`, which hosts agents as tokio tasks

mod base;
mod platform;
mod worker;

pub use base::{
    AgentContainer, AgentError, AgentRegistration, AgentStatus, AgentTransport, Envelope,
    LifecycleSignal, Registration, ReplyPort,
};
pub use platform::{InProcessContainer, InProcessRegistration};
pub use worker::CacheAgent;

#[cfg(test)]
pub use base::MockAgentTransport;
