//! Token module - The persisted cache-bust token
//!
//! One token per origin lives in durable storage. It is appended to URLs
//! and to the agent registration to force fresh fetches.

mod store;

pub use store::{CacheBustToken, TokenStore, DEFAULT_TOKEN_KEY, DEFAULT_TOKEN_PARAM};
