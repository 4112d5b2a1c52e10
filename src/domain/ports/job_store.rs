use crate::domain::entities::{CancelOutcome, JobHandle, JobStatusSnapshot, PostPayload, PublishResult};
use crate::domain::errors::SchedulerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates the job, or replaces payload and due time of the job already
    /// registered under `job_id`. Never creates a second entry for one id.
    async fn upsert(
        &self,
        job_id: &str,
        payload: PostPayload,
        due_at: DateTime<Utc>,
    ) -> SchedulerResult<JobHandle>;

    /// Merges one platform outcome into the job's status map. Recording the
    /// same result twice leaves the map unchanged.
    async fn record_attempt_result(&self, job_id: &str, result: &PublishResult)
        -> SchedulerResult<()>;

    async fn get(&self, job_id: &str) -> SchedulerResult<JobStatusSnapshot>;

    /// Only a `Pending` job can be cancelled.
    async fn cancel(&self, job_id: &str) -> SchedulerResult<CancelOutcome>;

    /// Deletes completed and cancelled jobs last touched before `before`.
    /// Failed jobs are kept for inspection.
    async fn purge_finished(&self, before: DateTime<Utc>) -> SchedulerResult<u64>;
}
