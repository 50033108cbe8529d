//! Lifecycle module - One-time agent setup and lifecycle monitoring
//!
//! Provides:
//! - Development/production mode detection
//! - `LifecycleManager`, which unregisters agents in development, registers
//!   and monitors them in production, and forwards agent notifications to
//!   the coordinator's relay

mod manager;
mod mode;

pub use manager::{LifecycleManager, LifecycleSettings, SetupOutcome};
pub use mode::{AgentMode, Environment};
