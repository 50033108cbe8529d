//! Cache-bust token storage
//!
//! The token store is constructed once at startup and shared by every
//! component that needs the token. It never returns an error: storage
//! failures degrade to an unpersisted token, and URLs that cannot be parsed
//! are handed back untouched.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use url::Url;

use crate::storage::KeyValueStore;

/// Durable storage key holding the current token
pub const DEFAULT_TOKEN_KEY: &str = "cache_bust_token";

/// Query parameter reserved for the token
pub const DEFAULT_TOKEN_PARAM: &str = "_cb";

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// Opaque cache-bust token of the form `cb_<timestamp>_<random>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheBustToken(String);

impl CacheBustToken {
    /// Generates a new token from the current time and a random suffix
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();

        Self(format!("cb_{}_{}", Utc::now().timestamp_millis(), suffix))
    }

    /// Wraps a token read back from storage
    ///
    /// Tokens are opaque, so any non-empty value is accepted.
    pub fn from_persisted(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheBustToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owner of the single persisted cache-bust token
pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    base: Url,
    key: String,
    param: String,
}

impl TokenStore {
    /// Creates a token store over the durable tier
    ///
    /// Relative URLs passed to [`TokenStore::append_to_url`] are resolved
    /// against `base`, usually the page origin.
    pub fn new(storage: Arc<dyn KeyValueStore>, base: Url) -> Self {
        Self {
            storage,
            base,
            key: DEFAULT_TOKEN_KEY.to_string(),
            param: DEFAULT_TOKEN_PARAM.to_string(),
        }
    }

    /// Overrides the storage key and query parameter names
    pub fn with_names(mut self, key: impl Into<String>, param: impl Into<String>) -> Self {
        self.key = key.into();
        self.param = param.into();
        self
    }

    /// Query parameter the token is written to
    pub fn param(&self) -> &str {
        &self.param
    }

    /// Reads the persisted token without creating one
    pub fn current(&self) -> Option<CacheBustToken> {
        match self.storage.get(&self.key) {
            Ok(value) => value.and_then(CacheBustToken::from_persisted),
            Err(e) => {
                tracing::warn!("Failed to read cache-bust token '{}': {}", self.key, e);
                None
            }
        }
    }

    /// Returns the persisted token, creating and persisting one if absent
    pub fn get_or_create(&self) -> CacheBustToken {
        match self.storage.get(&self.key) {
            Ok(Some(value)) => {
                if let Some(token) = CacheBustToken::from_persisted(value) {
                    return token;
                }
                self.regenerate()
            }
            Ok(None) => self.regenerate(),
            Err(e) => {
                // Storage is unusable; hand out a token for this call only
                tracing::warn!("Cache-bust token storage unavailable, using transient token: {}", e);
                CacheBustToken::generate()
            }
        }
    }

    /// Replaces the persisted token with a freshly generated one
    pub fn regenerate(&self) -> CacheBustToken {
        let token = CacheBustToken::generate();
        if let Err(e) = self.storage.set(&self.key, token.as_str()) {
            tracing::warn!("Failed to persist cache-bust token '{}': {}", self.key, e);
        } else {
            tracing::debug!("Generated cache-bust token {}", token);
        }
        token
    }

    /// Sets the reserved query parameter of `url` to the token
    ///
    /// Uses the persisted token when `token` is `None`. Any existing value of
    /// the parameter is replaced, other query pairs are preserved. URLs that
    /// cannot be parsed are returned unchanged.
    pub fn append_to_url(&self, url: &str, token: Option<&CacheBustToken>) -> String {
        let mut parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(url::ParseError::RelativeUrlWithoutBase) => match self.base.join(url) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!("Cannot add cache-bust token to '{}': {}", url, e);
                    return url.to_string();
                }
            },
            Err(e) => {
                tracing::warn!("Cannot add cache-bust token to '{}': {}", url, e);
                return url.to_string();
            }
        };

        let token = match token {
            Some(token) => token.clone(),
            None => self.get_or_create(),
        };

        let retained: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(name, _)| name != self.param.as_str())
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        {
            let mut pairs = parsed.query_pairs_mut();
            pairs.clear();
            pairs.extend_pairs(retained.iter().map(|(n, v)| (n.as_str(), v.as_str())));
            pairs.append_pair(&self.param, token.as_str());
        }

        parsed.to_string()
    }
}
