use std::sync::Arc;

use crate::application::services::SchedulingService;
use crate::config::{Config, StoreBackend};
use crate::domain::entities::Platform;
use crate::domain::ports::job_store::JobStore;
use crate::domain::ports::platform_publisher::{PlatformPublisher, PublisherRegistry};
use crate::domain::ports::task_queue::SchedulingQueue;
use crate::domain::ports::time_service::TimeService;
use crate::infrastructure::persistence::{Database, InMemoryJobQueue, SqliteJobQueue};
use crate::infrastructure::providers::{RelayPublisher, SimulatedPublisher};
use crate::infrastructure::runtime::TokioTimeService;
use crate::infrastructure::workers::{DispatchSettings, DispatcherPool, PublishDispatcher};
use crate::shared::rate_limiter::DispatchRateLimiter;

/// The queue and store views of one backing implementation.
#[derive(Clone)]
pub struct JobBackend {
    pub queue: Arc<dyn SchedulingQueue>,
    pub store: Arc<dyn JobStore>,
    /// Present for the SQLite backend so the pool can be closed on exit.
    pub database: Option<Database>,
}

/// Everything the dispatcher process needs, wired once at start-up.
pub struct Scheduler {
    pub backend: JobBackend,
    pub scheduling: SchedulingService,
    pub pool: DispatcherPool,
    pub time_service: Arc<dyn TimeService>,
}

pub async fn build_backend(config: &Config) -> anyhow::Result<JobBackend> {
    let policy = config.backoff_policy();

    match config.store_backend {
        StoreBackend::Sqlite => {
            let db = Database::connect(&config.database_url).await?;
            tracing::info!("Database connection established");

            db.run_migrations().await?;
            tracing::info!("Database migrations applied");

            let jobs = Arc::new(SqliteJobQueue::new(db.clone(), policy, config.lease_timeout));
            Ok(JobBackend {
                queue: jobs.clone(),
                store: jobs,
                database: Some(db),
            })
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory job store; scheduled posts are lost on restart");
            let jobs = Arc::new(InMemoryJobQueue::new(policy, config.lease_timeout));
            Ok(JobBackend {
                queue: jobs.clone(),
                store: jobs,
                database: None,
            })
        }
    }
}

/// Relay publishers when `PUBLISH_RELAY_URL` is set, simulated ones otherwise.
pub fn build_publishers(config: &Config) -> anyhow::Result<PublisherRegistry> {
    let mut registry = PublisherRegistry::new();

    for platform in Platform::ALL {
        let publisher: Arc<dyn PlatformPublisher> = match &config.publish_relay_url {
            Some(url) => Arc::new(RelayPublisher::new(
                platform,
                url,
                config.publish_relay_secret.clone(),
                config.publish_timeout,
            )?),
            None => Arc::new(SimulatedPublisher::for_platform(platform)),
        };
        registry.register(publisher);
    }

    match &config.publish_relay_url {
        Some(url) => tracing::info!(relay = %url, "Publishing through HTTP relay"),
        None => tracing::info!("Publishing with simulated platform publishers"),
    }

    Ok(registry)
}

pub async fn build_scheduler(config: &Config) -> anyhow::Result<Scheduler> {
    let backend = build_backend(config).await?;
    let publishers = build_publishers(config)?;
    build_scheduler_with(config, backend, publishers)
}

/// Wires a scheduler over an existing backend and publisher set.
pub fn build_scheduler_with(
    config: &Config,
    backend: JobBackend,
    publishers: PublisherRegistry,
) -> anyhow::Result<Scheduler> {
    let time_service: Arc<dyn TimeService> = Arc::new(TokioTimeService::new());

    let rate_limiter = DispatchRateLimiter::new(config.rate_limit_max, config.rate_limit_window)?;
    tracing::info!(
        max_starts = rate_limiter.max_starts(),
        window_ms = rate_limiter.window().as_millis() as u64,
        "Dispatch rate limiter initialized"
    );

    let dispatcher = Arc::new(PublishDispatcher::new(
        backend.queue.clone(),
        backend.store.clone(),
        publishers,
        rate_limiter,
        time_service.clone(),
        DispatchSettings {
            publish_timeout: config.publish_timeout,
            retry_scope: config.retry_scope,
        },
    ));

    let pool = DispatcherPool::new(
        dispatcher,
        backend.queue.clone(),
        time_service.clone(),
        config.worker_concurrency,
        config.poll_interval,
    );

    let scheduling = SchedulingService::new(
        backend.queue.clone(),
        backend.store.clone(),
        time_service.clone(),
    );

    Ok(Scheduler {
        backend,
        scheduling,
        pool,
        time_service,
    })
}
