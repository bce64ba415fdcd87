//! Vega - SharePoint list replication service
//!
//! Keeps a local SQLite copy of the configured SharePoint lists in sync
//! with Microsoft Graph, driven by change notifications.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::runtime::Handle;

use listsync::{
    ChangeTrigger, Dispatcher, GraphClient, LifecycleTrigger, ListReconciler, ListStore,
    RemoteSource, SqliteListStore, SubscriptionReconciler, SyncConfig, run_startup,
};

mod server;

use server::AppState;

const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(10);
const REACHABILITY_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let cfg = SyncConfig::load().context("Failed to load configuration")?;
    info!("Tracking {} lists", cfg.lists.len());

    let db_path = cfg.database.resolve_path()?;
    let store: Arc<dyn ListStore> = Arc::new(SqliteListStore::new(&db_path)?);
    info!("Using database {}", db_path.display());

    let graph = GraphClient::new(&cfg.graph);
    let graph = tokio::task::spawn_blocking(move || graph.authenticate().map(|_| graph))
        .await?
        .context("Failed to authenticate with Microsoft Graph")?;
    let source: Arc<dyn RemoteSource> = Arc::new(graph);

    let reconciler = Arc::new(
        ListReconciler::new(source.clone(), store).with_page_cap(cfg.sync.page_cap),
    );
    let subscriptions = Arc::new(SubscriptionReconciler::from_config(source, &cfg));
    let dispatcher = Arc::new(Dispatcher::new(reconciler, Handle::current()));

    let state = AppState {
        change: Arc::new(ChangeTrigger::new(&cfg.lists, dispatcher.clone())),
        lifecycle: Arc::new(LifecycleTrigger::new(subscriptions.clone())),
    };

    let listener = TcpListener::bind(&cfg.webhook.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.webhook.listen_address))?;
    info!("Webhook server listening on {}", cfg.webhook.listen_address);
    let server = tokio::spawn(async move {
        axum::serve(listener, server::router(state))
            .with_graceful_shutdown(server::shutdown_signal())
            .await
    });

    // Graph validates the endpoint when subscriptions are created
    server::wait_until_reachable(
        &cfg.webhook.ping_url(),
        REACHABILITY_TIMEOUT,
        REACHABILITY_INTERVAL,
    )
    .await?;

    let lists = cfg.lists.clone();
    // Notifications arriving now queue behind the startup pass of their list
    let summary =
        tokio::task::spawn_blocking(move || run_startup(&subscriptions, &dispatcher, &lists))
            .await?
            .context("Startup failed")?;
    let (inserted, updated, deleted) = summary.synced.iter().fold((0, 0, 0), |acc, s| {
        (acc.0 + s.items_inserted, acc.1 + s.items_updated, acc.2 + s.items_deleted)
    });
    info!(
        "Startup complete: {} subscriptions, {} items inserted, {} updated, {} deleted",
        summary.subscriptions.len(),
        inserted,
        updated,
        deleted
    );

    server.await??;
    info!("Webhook server stopped");
    Ok(())
}
