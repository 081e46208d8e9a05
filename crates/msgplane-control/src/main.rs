//! msgplane control plane - address scheduling and reconciliation service
//!
//! This is the main entry point for the control plane service. It serves
//! the admission and status APIs, runs one reconciliation worker per
//! address space and follows infrastructure changes on the cluster.

use std::path::PathBuf;
use std::sync::Arc;

use msgplane_control::{
    api, ControlConfig, ControlPlaneService, Dispatcher, PlanCatalog, ReconcileTrigger,
    Reconciler, StatusBoard, Trigger,
};
use msgplane_infra::{Infra, InfraSettings, K8sInfra};
use msgplane_store::RocksStore;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,msgplane=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting msgplane control plane");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/data".to_string());
    let catalog_path = PathBuf::from(
        std::env::var("PLAN_CATALOG_PATH")
            .unwrap_or_else(|_| "/etc/msgplane/plans.json".to_string()),
    );
    let config = ControlConfig::from_env();

    // Initialize store
    let store = Arc::new(RocksStore::open(&data_dir)?);
    tracing::info!(data_dir = %data_dir, "Initialized RocksDB store");

    let catalog = Arc::new(PlanCatalog::load(&catalog_path)?);
    tracing::info!(
        path = %catalog_path.display(),
        version = catalog.snapshot().version(),
        "Loaded plan catalog"
    );

    let infra = Arc::new(K8sInfra::new(InfraSettings::from_env()).await?);
    tracing::info!(namespace = %infra.settings().namespace, "Connected to Kubernetes");

    // Reconciliation
    let board = Arc::new(StatusBoard::new());
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store),
        Arc::clone(&infra) as Arc<dyn Infra>,
        Arc::clone(&catalog),
        Arc::clone(&board),
        config.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(reconciler));

    let (events_tx, mut events_rx) = mpsc::channel(config.event_queue_depth.max(1));
    let watcher = Arc::clone(&infra);
    tokio::spawn(async move { watcher.run_watcher(events_tx).await });

    let forwarder = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            tracing::trace!(space_id = %event.space_id, object = %event.object, "Infra event");
            forwarder.notify(&event.space_id, Trigger::Infra);
        }
    });

    tokio::spawn(Arc::clone(&dispatcher).run_periodic(Some(catalog_path)));
    let resumed = dispatcher.notify_all(Trigger::Resync);
    tracing::info!(spaces = resumed, "Resumed reconciliation");

    // Initialize control plane service
    let control = Arc::new(ControlPlaneService::new(
        store,
        catalog,
        board,
        dispatcher as Arc<dyn ReconcileTrigger>,
    ));

    // Start server
    let app = api::router(control);
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
