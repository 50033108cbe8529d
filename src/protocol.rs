//! Control protocol between the page and the background agent
//!
//! Messages are a small closed JSON protocol tagged by a `command` field.
//! Page → agent messages are [`ControlMessage`]s, unsolicited agent → page
//! notifications are [`AgentEvent`]s, and replies delivered on a private
//! one-shot channel are [`AgentReply`]s.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Commands sent from the page to the background agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Drop every cache bucket the agent owns
    ClearAllCaches,
    /// Drop cached responses for the given absolute URLs
    InvalidateUrls { urls: Vec<String> },
    /// Ask for version information (expects a reply)
    GetVersion,
}

impl ControlMessage {
    /// Wire name of the command
    pub fn command(&self) -> &'static str {
        match self {
            ControlMessage::ClearAllCaches => "CLEAR_ALL_CACHES",
            ControlMessage::InvalidateUrls { .. } => "INVALIDATE_URLS",
            ControlMessage::GetVersion => "GET_VERSION",
        }
    }

    /// Returns true if the sender should wait for a reply
    pub fn expects_reply(&self) -> bool {
        matches!(self, ControlMessage::GetVersion)
    }
}

/// Unsolicited notifications emitted by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEvent {
    /// All caches were dropped at `timestamp` (millis since epoch)
    CacheCleared { timestamp: i64 },
    /// Confirmation echo of an invalidation
    #[serde(rename = "INVALIDATE_URLS")]
    UrlsInvalidated { urls: Vec<String> },
}

impl AgentEvent {
    pub fn cache_cleared_now() -> Self {
        AgentEvent::CacheCleared {
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Version information returned in reply to [`ControlMessage::GetVersion`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Agent build version
    pub version: String,
    /// Version prefix of the cache buckets the agent owns
    pub cache_version: String,
    /// When the reply was produced (millis since epoch)
    pub timestamp: i64,
}

impl VersionInfo {
    pub fn new(version: impl Into<String>, cache_version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            cache_version: cache_version.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Anything the agent may send back on a reply channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentReply {
    Version(VersionInfo),
    Event(AgentEvent),
}
