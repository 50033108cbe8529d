//! flowcache demo: runs one page against an in-process agent

use std::sync::Arc;

use anyhow::{Context, Result};
use flowcache::agent::InProcessContainer;
use flowcache::cache::{CacheSelector, CachedResponse};
use flowcache::config::CacheConfig;
use flowcache::lifecycle::SetupOutcome;
use flowcache::{init_tracing, CacheLayer};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const CACHE_VERSION: &str = "flowcache-v1";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    tracing::info!("Starting flowcache {}", AGENT_VERSION);

    let config = CacheConfig::load();
    let container = Arc::new(InProcessContainer::new(AGENT_VERSION, CACHE_VERSION));
    let layer = CacheLayer::in_process(config, container.clone())
        .context("Failed to set up the cache layer")?;

    let mut events = layer.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!("Page event {} {:?}", event.name(), event.detail());
        }
    });

    match layer.start().await {
        SetupOutcome::Registered => {}
        other => {
            tracing::info!("No agent running ({:?}); nothing to demonstrate", other);
            return Ok(());
        }
    }

    let coordinator = layer.coordinator();
    let agent = container
        .controller()
        .context("Agent registered but not controlling the page")?;
    for url in ["/api/poses", "/api/flows", "/images/warrior.webp", "/app.js"] {
        let absolute = coordinator.tokens().append_to_url(url, None);
        agent
            .cache_response(&absolute, CachedResponse::ok("{}"))
            .await
            .with_context(|| format!("Failed to cache {}", absolute))?;
    }

    tracing::info!("Version check: {:?}", coordinator.check_version().await);
    tracing::info!("Invalidate yoga data: {:?}", coordinator.invalidate_yoga_data_cache().await);
    tracing::info!(
        "Cleared {} cached image entries",
        coordinator.clear_cache_by_category(CacheSelector::Images).await
    );

    container
        .install_update("0.2.0", "flowcache-v2")
        .await
        .context("Failed to install agent update")?;
    tracing::info!("Version check after update: {:?}", coordinator.check_version().await);

    let report = coordinator.clear_all_caches().await;
    tracing::info!("Full clear complete: {} ({:?})", report.is_complete(), report);

    layer.shutdown().await;
    Ok(())
}
