//! Base agent traits and types
//!
//! Defines the control channel between page and agent, the platform
//! container that hosts agents, and the lifecycle states a page observes.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

use crate::protocol::{AgentEvent, AgentReply, ControlMessage};

/// One-shot private reply channel attached to a control message
pub type ReplyPort = oneshot::Sender<AgentReply>;

/// A control message together with its optional reply channel
#[derive(Debug)]
pub struct Envelope {
    pub message: ControlMessage,
    pub reply: Option<ReplyPort>,
}

/// Errors that can occur talking to or managing agents
#[derive(Debug, Error)]
pub enum AgentError {
    /// The environment cannot host background agents
    #[error("Background agents are not supported here")]
    Unsupported,

    /// No agent controls the page
    #[error("No agent is controlling the page")]
    NoController,

    /// Agent is already running
    #[error("Agent is already running")]
    AlreadyRunning,

    /// Registration was rejected
    #[error("Agent registration failed: {0}")]
    Registration(String),

    /// Posting a message failed
    #[error("Agent transport error: {0}")]
    Transport(String),
}

/// Run state of a `CacheAgent` message loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Created, loop not started
    Idle,
    Running,
    /// Loop ended; the agent will not run again
    Stopped,
}

impl AgentStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, AgentStatus::Running)
    }
}

/// Lifecycle state of the background agent relative to the current page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRegistration {
    Unregistered,
    Registering,
    ActiveNotControlling,
    ActiveControlling,
    UpdateFound,
    UpdateActivated,
}

impl AgentRegistration {
    /// Returns true once registration has produced an active agent
    pub fn is_active(&self) -> bool {
        !matches!(self, AgentRegistration::Unregistered | AgentRegistration::Registering)
    }
}

/// Notifications the platform delivers to the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// A new agent version is installing
    UpdateFound,
    /// The new agent version has activated
    UpdateActivated,
    /// A different agent instance now controls the page
    ControllerChange,
    /// Unsolicited message from the agent
    Message(AgentEvent),
}

/// Typed control channel from the page to its controlling agent
#[cfg_attr(test, mockall::automock)]
pub trait AgentTransport: Send + Sync {
    /// Returns true if an active agent controls the page
    fn has_controller(&self) -> bool;

    /// Posts a message to the controlling agent
    ///
    /// Delivery is in send order; there is no acknowledgment unless a reply
    /// port is attached and the agent chooses to answer.
    fn post(&self, message: ControlMessage, reply: Option<ReplyPort>) -> Result<(), AgentError>;
}

/// A registration of an agent script for a scope
#[async_trait]
pub trait Registration: Send + Sync {
    fn scope(&self) -> &str;

    fn script_url(&self) -> &str;

    /// Unregisters, returning whether the registration still existed
    async fn unregister(&self) -> Result<bool, AgentError>;
}

/// Platform container able to host background agents for an origin
#[async_trait]
pub trait AgentContainer: AgentTransport {
    /// Returns true if the environment can host agents at all
    fn is_supported(&self) -> bool;

    /// Lists every registration for this origin
    async fn registrations(&self) -> Result<Vec<Arc<dyn Registration>>, AgentError>;

    /// Registers the agent script for `scope`
    async fn register(
        &self,
        script_url: &str,
        scope: &str,
    ) -> Result<Arc<dyn Registration>, AgentError>;

    /// Subscribes to lifecycle signals and agent messages
    fn subscribe(&self) -> broadcast::Receiver<LifecycleSignal>;
}
