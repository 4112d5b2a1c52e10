use crate::domain::entities::{Job, JobHandle, PostPayload};
use crate::domain::errors::SchedulerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// How a claimed job left the `Active` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    Completed,
    Retrying { attempt: u32, delay: Duration },
    Failed { attempts: u32 },
    /// Resubmitted while in flight; back to `Pending` with the new due time.
    Superseded,
    /// Our lease expired and another worker owns the job now.
    LeaseLost,
}

#[async_trait]
pub trait SchedulingQueue: Send + Sync {
    /// Registers `payload` under `job_id` to become due after `delay`.
    /// An existing entry for the same id is replaced, not duplicated.
    async fn enqueue(
        &self,
        job_id: &str,
        payload: PostPayload,
        delay: Duration,
    ) -> SchedulerResult<JobHandle>;

    /// Claims the earliest due job, moving it to `Active` under a fresh lease.
    /// A job is handed to at most one caller.
    async fn fetch_due(&self) -> SchedulerResult<Option<Job>>;

    /// Earliest time anything could become claimable.
    async fn next_due_at(&self) -> SchedulerResult<Option<DateTime<Utc>>>;

    async fn complete(&self, job: &Job) -> SchedulerResult<FinishOutcome>;

    /// Applies the backoff policy: re-enqueue with a delay, or mark `Failed`.
    async fn fail(&self, job: &Job, error: &str, retryable: bool)
        -> SchedulerResult<FinishOutcome>;
}
