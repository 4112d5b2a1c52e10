use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::domain::entities::{Job, Platform, PostPayload, PublishError, PublishResult};
use crate::domain::errors::SchedulerResult;
use crate::domain::ports::job_store::JobStore;
use crate::domain::ports::platform_publisher::PublisherRegistry;
use crate::domain::ports::task_queue::{FinishOutcome, SchedulingQueue};
use crate::domain::ports::time_service::TimeService;
use crate::domain::services::RetryScope;
use crate::shared::rate_limiter::DispatchRateLimiter;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Upper bound on a single platform publish call.
    pub publish_timeout: Duration,
    pub retry_scope: RetryScope,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(30),
            retry_scope: RetryScope::FailedOnly,
        }
    }
}

/// Runs one claimed job: fans the post out to its platforms, records every
/// per-platform result, then completes or fails the job through the queue.
pub struct PublishDispatcher {
    queue: Arc<dyn SchedulingQueue>,
    store: Arc<dyn JobStore>,
    publishers: PublisherRegistry,
    rate_limiter: DispatchRateLimiter,
    time_service: Arc<dyn TimeService>,
    settings: DispatchSettings,
}

impl PublishDispatcher {
    pub fn new(
        queue: Arc<dyn SchedulingQueue>,
        store: Arc<dyn JobStore>,
        publishers: PublisherRegistry,
        rate_limiter: DispatchRateLimiter,
        time_service: Arc<dyn TimeService>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queue,
            store,
            publishers,
            rate_limiter,
            time_service,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Claims and dispatches the next due job, if any.
    pub async fn process_next(&self) -> SchedulerResult<Option<FinishOutcome>> {
        match self.queue.fetch_due().await? {
            Some(job) => self.dispatch(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// A storage error while recording results is returned as-is and the
    /// job stays `Active`; lease expiry hands it out again later.
    pub async fn dispatch(&self, job: Job) -> SchedulerResult<FinishOutcome> {
        self.rate_limiter.until_ready().await;

        let snapshot = self.store.get(&job.id).await?;
        let targets = match self.settings.retry_scope {
            RetryScope::FailedOnly => snapshot.unpublished_targets(),
            RetryScope::AllPlatforms => snapshot.targets.clone(),
        };
        let attempt = job.attempts + 1;

        if targets.is_empty() {
            info!(job_id = %job.id, "All platforms already published, completing job");
            let outcome = self.queue.complete(&job).await?;
            record_finish(&outcome);
            return Ok(outcome);
        }

        info!(
            job_id = %job.id,
            post_id = %job.post_id,
            attempt,
            platforms = ?targets,
            "Dispatching post"
        );

        let results = join_all(
            targets
                .iter()
                .map(|platform| self.publish_to(*platform, &job.payload)),
        )
        .await;

        for result in &results {
            self.store.record_attempt_result(&job.id, result).await?;
        }

        let published = results.iter().filter(|r| r.success).count();
        info!(
            job_id = %job.id,
            attempt,
            "Post {} published to {}/{} platforms",
            job.post_id,
            published,
            results.len()
        );

        let snapshot = self.store.get(&job.id).await?;
        let outcome = if snapshot.all_targets_published() {
            self.queue.complete(&job).await?
        } else {
            let failures: Vec<&PublishResult> = results.iter().filter(|r| !r.success).collect();
            let retryable = failures.iter().all(|r| r.retryable);
            let error = if failures.is_empty() {
                "target platforms changed during attempt".to_string()
            } else {
                failures
                    .iter()
                    .map(|r| {
                        format!(
                            "{}: {}",
                            r.platform,
                            r.error_detail.as_deref().unwrap_or("publish failed")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            self.queue.fail(&job, &error, retryable).await?
        };

        match &outcome {
            FinishOutcome::Completed => info!(job_id = %job.id, "Job completed"),
            FinishOutcome::Retrying { attempt, delay } => warn!(
                job_id = %job.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Job will be retried"
            ),
            FinishOutcome::Failed { attempts } => {
                error!(job_id = %job.id, attempts, "Job failed permanently")
            }
            FinishOutcome::Superseded => {
                info!(job_id = %job.id, "Job was resubmitted during attempt, rescheduled")
            }
            FinishOutcome::LeaseLost => {
                warn!(job_id = %job.id, "Lease expired during attempt, outcome discarded")
            }
        }
        record_finish(&outcome);

        Ok(outcome)
    }

    /// Never fails: timeouts, panics and missing publishers all become a
    /// failed `PublishResult`.
    async fn publish_to(&self, platform: Platform, payload: &PostPayload) -> PublishResult {
        let started = Instant::now();

        let outcome = match self.publishers.get(platform) {
            None => Err(PublishError::Permanent(format!(
                "no publisher registered for {}",
                platform
            ))),
            Some(publisher) => {
                let call = AssertUnwindSafe(publisher.publish(payload)).catch_unwind();
                match tokio::time::timeout(self.settings.publish_timeout, call).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => Err(PublishError::Transient(format!(
                        "publisher panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                    Err(_) => Err(PublishError::Timeout(self.settings.publish_timeout)),
                }
            }
        };

        let label = match &outcome {
            Ok(()) => "success",
            Err(PublishError::Transient(_)) => "transient",
            Err(PublishError::Permanent(_)) => "permanent",
            Err(PublishError::Timeout(_)) => "timeout",
        };
        metrics::counter!(
            "postfanout_publish_attempts_total",
            "platform" => platform.as_str(),
            "outcome" => label
        )
        .increment(1);
        metrics::histogram!("postfanout_publish_duration_seconds", "platform" => platform.as_str())
            .record(started.elapsed().as_secs_f64());

        match &outcome {
            Ok(()) => debug!(%platform, post_id = %payload.post_id, "Published"),
            Err(e) => warn!(%platform, post_id = %payload.post_id, "Publish failed: {}", e),
        }

        PublishResult::from_outcome(platform, self.time_service.now(), outcome)
    }
}

fn record_finish(outcome: &FinishOutcome) {
    let label = match outcome {
        FinishOutcome::Completed => "completed",
        FinishOutcome::Retrying { .. } => "retrying",
        FinishOutcome::Failed { .. } => "failed",
        FinishOutcome::Superseded => "superseded",
        FinishOutcome::LeaseLost => "lease_lost",
    };
    metrics::counter!("postfanout_jobs_finished_total", "outcome" => label).increment(1);
}

pub(super) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracts_payload() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        let borrowed: Box<dyn Any + Send> = Box::new("static boom");
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(owned.as_ref()), "boom");
        assert_eq!(panic_message(borrowed.as_ref()), "static boom");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
