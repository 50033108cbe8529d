//! Content categories for selective cache clearing
//!
//! Entries are classified by the path of the stored request URL; the query
//! string and fragment are ignored.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

static IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(png|jpe?g|gif|webp|svg|ico|avif|bmp)$").expect("valid image pattern")
});

static ASSET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(m?js|css|woff2?|ttf|otf|eot|map|json)$").expect("valid asset pattern")
});

const API_PREFIX: &str = "/api/";

/// Category of cached content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSelector {
    /// Image files, by extension
    Images,
    /// Responses under `/api/`
    Api,
    /// Static scripts, styles, fonts and manifests
    Assets,
    /// Every entry
    All,
}

impl CacheSelector {
    /// Returns true if a cached request for `url` belongs to this category
    pub fn matches(&self, url: &str) -> bool {
        let path = request_path(url);
        match self {
            CacheSelector::Images => IMAGE_PATTERN.is_match(&path),
            CacheSelector::Api => is_api_path(&path),
            CacheSelector::Assets => !is_api_path(&path) && ASSET_PATTERN.is_match(&path),
            CacheSelector::All => true,
        }
    }

    /// Picks the most specific category for `url`, if any
    pub fn classify(url: &str) -> Option<CacheSelector> {
        [CacheSelector::Api, CacheSelector::Images, CacheSelector::Assets]
            .into_iter()
            .find(|selector| selector.matches(url))
    }

    /// Short lowercase name, also used as a bucket suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSelector::Images => "images",
            CacheSelector::Api => "api",
            CacheSelector::Assets => "assets",
            CacheSelector::All => "all",
        }
    }
}

impl fmt::Display for CacheSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_api_path(path: &str) -> bool {
    path.starts_with(API_PREFIX) || path == "/api"
}

/// Path component of an absolute or root-relative URL
fn request_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}
