//! Development/production mode detection

use url::{Host, Url};

/// How the lifecycle manager treats background agents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Never register; remove anything already registered
    Development,
    /// Register, monitor updates, relay notifications
    Production,
}

/// The page's execution environment
#[derive(Debug, Clone)]
pub struct Environment {
    origin: Url,
    debug: bool,
}

impl Environment {
    pub fn new(origin: Url, debug: bool) -> Self {
        Self { origin, debug }
    }

    /// Returns true if the origin host is a loopback address
    pub fn is_loopback(&self) -> bool {
        match self.origin.host() {
            Some(Host::Domain(domain)) => {
                let domain = domain.to_ascii_lowercase();
                domain == "localhost" || domain.ends_with(".localhost")
            }
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        }
    }

    /// Development iff the debug flag is set and the origin is loopback
    pub fn mode(&self) -> AgentMode {
        if self.debug && self.is_loopback() {
            AgentMode::Development
        } else {
            AgentMode::Production
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(origin: &str, debug: bool) -> Environment {
        Environment::new(Url::parse(origin).unwrap(), debug)
    }

    #[test]
    fn test_loopback_hosts() {
        assert!(env("http://localhost:3000", false).is_loopback());
        assert!(env("http://app.localhost", false).is_loopback());
        assert!(env("http://127.0.0.1:8080", false).is_loopback());
        assert!(env("http://127.3.2.1", false).is_loopback());
        assert!(env("http://[::1]:3000", false).is_loopback());
        assert!(!env("https://yoga.test", false).is_loopback());
        assert!(!env("http://192.168.1.20", false).is_loopback());
    }

    #[test]
    fn test_development_requires_debug_and_loopback() {
        assert_eq!(env("http://localhost:3000", true).mode(), AgentMode::Development);
        assert_eq!(env("http://localhost:3000", false).mode(), AgentMode::Production);
        assert_eq!(env("https://yoga.test", true).mode(), AgentMode::Production);
        assert_eq!(env("https://yoga.test", false).mode(), AgentMode::Production);
    }
}
