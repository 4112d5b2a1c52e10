use postfanout::bootstrap::JobBackend;
use postfanout::domain::entities::JobStatusSnapshot;
use postfanout::domain::ports::job_store::JobStore;
use postfanout::domain::ports::platform_publisher::PublisherRegistry;
use postfanout::infrastructure::runtime::TokioTimeService;
use postfanout::infrastructure::workers::{DispatchSettings, PublishDispatcher};
use postfanout::shared::rate_limiter::DispatchRateLimiter;
use std::sync::Arc;
use std::time::Duration;

/// Generous enough that tests never wait on the limiter unless they mean to.
pub fn relaxed_rate_limiter() -> DispatchRateLimiter {
    DispatchRateLimiter::new(1000, Duration::from_secs(1)).unwrap()
}

pub fn build_dispatcher(
    backend: &JobBackend,
    publishers: PublisherRegistry,
    settings: DispatchSettings,
) -> PublishDispatcher {
    PublishDispatcher::new(
        backend.queue.clone(),
        backend.store.clone(),
        publishers,
        relaxed_rate_limiter(),
        Arc::new(TokioTimeService::new()),
        settings,
    )
}

/// Drives the dispatcher until `job_id` reaches a terminal state.
pub async fn run_until_finished(
    dispatcher: &PublishDispatcher,
    backend: &JobBackend,
    job_id: &str,
) -> JobStatusSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        dispatcher.process_next().await.unwrap();
        let snapshot = backend.store.get(job_id).await.unwrap();
        if snapshot.state.is_terminal() {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not finish, last state {}",
            job_id,
            snapshot.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
