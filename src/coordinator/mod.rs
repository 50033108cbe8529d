//! Coordinator module - The page-side cache coordination API
//!
//! Provides:
//! - `CacheCoordinator`, the single entry point for invalidation, clears,
//!   version checks and hard refreshes
//! - Best-effort outcome types (`Delivery`, `ClearReport`, `VersionCheck`)
//! - Network priming and page reload seams

mod client;
mod network;
mod outcome;

pub use client::{
    CacheCoordinator, CoordinatorSettings, PageServices, PRACTICE_URLS, USER_URLS,
    YOGA_DATA_URLS,
};
pub use network::{HttpPrimer, LoggingReloader, NetworkPrimer, PageReloader, PrimeError};
pub use outcome::{ClearReport, Delivery, VersionCheck};

#[cfg(test)]
pub use network::{MockNetworkPrimer, MockPageReloader};
