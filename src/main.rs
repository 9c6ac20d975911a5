//! Service entry point: configuration, logging, engine wiring, HTTP serve.

use std::sync::Arc;

use alder::AppState;
use alder::Config;
use alder::build_router;
use alder_core::EventCache;
use alder_core::MemoryCache;
use alder_distribution::Distributor;
use alder_distribution::EventHandler;
use alder_distribution::EventLog;
use alder_distribution::HashRing;
use alder_distribution::MemoryEventLog;
use alder_distribution::MemorySubscriptionStore;
use alder_distribution::ResourceWatcher;
use alder_distribution::SubscriptionRegistry;
use alder_distribution::SubscriptionWatcher;
use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = %config.node_id,
        "starting alder"
    );

    // Embedded single-process topology: in-memory cache, log, and
    // subscription store. Deployments with shared infrastructure swap these
    // for networked implementations of the same traits.
    let cache: Arc<dyn EventCache> = MemoryCache::new();
    let log: Arc<dyn EventLog> = MemoryEventLog::new();
    let sub_store: Arc<dyn SubscriptionWatcher> = MemorySubscriptionStore::new();

    let ring = Arc::new(HashRing::new(config.node_id.clone(), config.ring_nodes.clone()));
    let registry = SubscriptionRegistry::new();
    let handler = EventHandler::new(cache.clone(), registry.clone(), ring.clone(), reqwest::Client::new());
    let distributor = Distributor::new(cache, log.clone(), sub_store, registry, handler, ring);

    let cancel = CancellationToken::new();
    distributor.start(cancel.clone()).await.context("starting distributor")?;

    let state = AppState::new(Arc::new(ResourceWatcher::new(log)));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;
    info!(addr = %config.http_addr, "watch api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(cancel))
        .await
        .context("serving watch api")?;

    info!("alder stopped");
    Ok(())
}

/// Resolve on ctrl-c, cancelling every engine loop first.
async fn shutdown(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    cancel.cancel();
}
