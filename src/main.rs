use postfanout::bootstrap;
use postfanout::config::Config;
use postfanout::infrastructure::observability;
use postfanout::infrastructure::workers::spawn_retention_task;
use postfanout::shared::install_shutdown_handler;
use std::time::Duration;

const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing and metrics
    let _guard = observability::init(&config)?;
    tracing::info!(
        backend = ?config.store_backend,
        workers = config.worker_concurrency,
        retry_scope = config.retry_scope.as_str(),
        "Configuration loaded"
    );

    let scheduler = bootstrap::build_scheduler(&config).await?;
    let shutdown = install_shutdown_handler();

    let retention = spawn_retention_task(
        scheduler.backend.store.clone(),
        scheduler.time_service.clone(),
        config.completed_retention,
        RETENTION_INTERVAL,
        shutdown.clone(),
    );

    let workers = scheduler.pool.start(shutdown.clone());
    tracing::info!("Dispatcher running with {} workers", scheduler.pool.size());

    shutdown.cancelled().await;
    tracing::info!("Waiting for in-flight jobs to finish");
    workers.wait().await;
    if let Err(e) = retention.await {
        tracing::warn!("Retention task ended abnormally: {}", e);
    }

    if let Some(db) = &scheduler.backend.database {
        db.close().await;
    }
    tracing::info!("Dispatcher stopped");

    Ok(())
}
