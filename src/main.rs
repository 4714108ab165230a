use std::sync::Arc;

use order_ingest::broker::KafkaBroker;
use order_ingest::config::PipelineConfig;
use order_ingest::lifecycle::{setup_tracing, PipelineSystem};
use order_ingest::store::{create_pool, PgOrderStore};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), String> {
    // Setup tracing once for the entire application
    setup_tracing();

    let config = PipelineConfig::from_env().map_err(|e| e.to_string())?;
    info!(
        topic = %config.kafka.topic,
        group_id = %config.kafka.group_id,
        http_addr = %config.http_addr,
        "Starting order ingest"
    );

    // Startup order: store, broker, pipeline, lookup API
    let pool = create_pool(
        &config.postgres.dsn,
        config.postgres.max_connections,
        config.postgres.min_connections,
    )
    .await
    .map_err(|e| format!("database connection failed: {e}"))?;
    let store = Arc::new(PgOrderStore::new(pool));

    let broker = Arc::new(KafkaBroker::connect(&config.kafka).map_err(|e| e.to_string())?);

    let mut system = PipelineSystem::start(broker, Arc::clone(&store), &config.pipeline).await;

    let listener = TcpListener::bind(config.http_addr)
        .await
        .map_err(|e| format!("cannot bind {}: {e}", config.http_addr))?;
    system.serve_api(listener).map_err(|e| e.to_string())?;

    wait_for_signal().await;
    info!("Termination signal received, draining");

    let drained = system.shutdown().await;
    store.pool().close().await;

    drained.map_err(|e| {
        error!(error = %e, "Unclean shutdown");
        e.to_string()
    })
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
