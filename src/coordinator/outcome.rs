//! Outcome types for best-effort operations
//!
//! Coordinator calls never fail. These types say what actually happened so
//! callers cannot mistake "sent" for "applied".

use crate::protocol::VersionInfo;

/// Result of a fire-and-forget control message
#[must_use = "delivery is best-effort; check it if the caller depends on the message"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the agent's channel; no acknowledgment implied
    Sent,
    /// No agent controls the page, nothing was sent
    NoAgent,
    /// Nothing left to send after normalization
    NothingToSend,
    /// The channel rejected the message
    Failed(String),
}

impl Delivery {
    pub fn was_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

/// Per-step results of a full clear
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Durable key/value tier was cleared
    pub durable_cleared: bool,
    /// Session tier was cleared
    pub session_cleared: bool,
    /// Cache buckets deleted
    pub buckets_deleted: usize,
    /// Bucket listing or deletions that failed
    pub bucket_failures: usize,
    /// The no-cache priming request completed
    pub primed: bool,
}

impl ClearReport {
    /// Returns true if every step succeeded
    pub fn is_complete(&self) -> bool {
        self.durable_cleared && self.session_cleared && self.bucket_failures == 0 && self.primed
    }
}

/// Result of comparing the agent version with the last one seen this session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    /// No agent answered
    Unavailable,
    /// First version observed in this session
    FirstSeen(VersionInfo),
    /// Same version as last time
    Unchanged(VersionInfo),
    /// A new agent version is serving the page
    Changed {
        previous: String,
        current: VersionInfo,
    },
}

impl VersionCheck {
    pub fn is_changed(&self) -> bool {
        matches!(self, VersionCheck::Changed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_was_sent() {
        assert!(Delivery::Sent.was_sent());
        assert!(!Delivery::NoAgent.was_sent());
        assert!(!Delivery::Failed("closed".into()).was_sent());
    }

    #[test]
    fn test_clear_report_complete() {
        let mut report = ClearReport {
            durable_cleared: true,
            session_cleared: true,
            buckets_deleted: 3,
            bucket_failures: 0,
            primed: true,
        };
        assert!(report.is_complete());

        report.primed = false;
        assert!(!report.is_complete());
        assert!(!ClearReport::default().is_complete());
    }
}
