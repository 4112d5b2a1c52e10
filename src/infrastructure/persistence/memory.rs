use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::entities::{
    validate_transition, CancelOutcome, Job, JobHandle, JobState, JobStatusSnapshot, Platform,
    PostPayload, PublishResult,
};
use crate::domain::errors::{SchedulerError, SchedulerResult};
use crate::domain::ports::job_store::JobStore;
use crate::domain::ports::task_queue::{FinishOutcome, SchedulingQueue};
use crate::domain::services::{due_after, BackoffPolicy, RetryDecision};

const LEASE_EXPIRED: &str = "lease expired before the attempt finished";

struct StoredJob {
    job: Job,
    results: BTreeMap<Platform, PublishResult>,
    published: bool,
    published_at: Option<DateTime<Utc>>,
}

impl StoredJob {
    fn snapshot(&self) -> JobStatusSnapshot {
        JobStatusSnapshot {
            job_id: self.job.id.clone(),
            post_id: self.job.post_id.clone(),
            state: self.job.state,
            attempts: self.job.attempts,
            max_attempts: self.job.max_attempts,
            targets: self.job.payload.platforms.clone(),
            published: self.published,
            published_at: self.published_at,
            last_error: self.job.last_error.clone(),
            results: self.results.clone(),
        }
    }

    fn transition(&mut self, to: JobState, now: DateTime<Utc>) -> SchedulerResult<()> {
        validate_transition(self.job.state, to)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;
        self.job.state = to;
        self.job.updated_at = now;
        Ok(())
    }

    fn release(&mut self) {
        self.job.claim_id = None;
        self.job.locked_until = None;
    }

    /// Starts a fresh fan-out for the current payload. `published_at` keeps
    /// the first publication time.
    fn reset_round(&mut self) {
        self.job.attempts = 0;
        self.job.last_error = None;
        self.results.clear();
        self.published = false;
    }
}

/// (due_at, job_id, revision). Entries are never removed eagerly; a popped
/// entry that no longer matches its job is discarded.
type DueEntry = Reverse<(DateTime<Utc>, String, i64)>;

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, StoredJob>,
    due: BinaryHeap<DueEntry>,
}

impl QueueState {
    fn is_live(&self, entry: &DueEntry) -> bool {
        let Reverse((due_at, job_id, revision)) = entry;
        self.jobs.get(job_id).is_some_and(|stored| {
            stored.job.state == JobState::Pending
                && stored.job.revision == *revision
                && stored.job.due_at == *due_at
        })
    }

    fn schedule(&mut self, job: &Job) {
        self.due
            .push(Reverse((job.due_at, job.id.clone(), job.revision)));
    }

    fn drop_stale_heads(&mut self) {
        while let Some(head) = self.due.peek() {
            if self.is_live(head) {
                break;
            }
            self.due.pop();
        }
    }
}

/// Memory-only job store and queue. Nothing survives a restart; intended for
/// tests and local runs.
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    policy: BackoffPolicy,
    lease_timeout: Duration,
}

impl InMemoryJobQueue {
    pub fn new(policy: BackoffPolicy, lease_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            policy,
            lease_timeout,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn claim(&self, stored: &mut StoredJob, now: DateTime<Utc>) -> SchedulerResult<Job> {
        stored.transition(JobState::Active, now)?;
        stored.job.claim_id = Some(Uuid::new_v4().to_string());
        stored.job.locked_until = Some(due_after(now, self.lease_timeout));
        Ok(stored.job.clone())
    }

    /// Shared guard for `complete`/`fail`. Returns `Some(outcome)` when the
    /// caller must stop because the claim is stale or superseded.
    fn check_claim(
        state: &mut QueueState,
        job: &Job,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<FinishOutcome>> {
        let Some(stored) = state.jobs.get_mut(&job.id) else {
            warn!(job_id = %job.id, "Job disappeared before the attempt was finalized");
            return Ok(Some(FinishOutcome::LeaseLost));
        };

        if stored.job.state != JobState::Active || stored.job.claim_id != job.claim_id {
            warn!(job_id = %job.id, "Lease lost before the attempt was finalized");
            return Ok(Some(FinishOutcome::LeaseLost));
        }

        if stored.job.revision != job.revision {
            stored.transition(JobState::Pending, now)?;
            stored.reset_round();
            stored.release();
            let rescheduled = stored.job.clone();
            state.schedule(&rescheduled);
            info!(job_id = %job.id, "Job was resubmitted during dispatch; rescheduled");
            return Ok(Some(FinishOutcome::Superseded));
        }

        Ok(None)
    }
}

#[async_trait]
impl JobStore for InMemoryJobQueue {
    async fn upsert(
        &self,
        job_id: &str,
        payload: PostPayload,
        due_at: DateTime<Utc>,
    ) -> SchedulerResult<JobHandle> {
        payload.validate()?;
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let job = match state.jobs.get_mut(job_id) {
            Some(stored) => {
                stored.job.post_id = payload.post_id.clone();
                stored.job.payload = payload;
                stored.job.due_at = due_at;
                stored.job.max_attempts = self.policy.max_attempts;
                stored.job.revision += 1;
                stored.job.updated_at = now;
                if stored.job.state != JobState::Active {
                    stored.transition(JobState::Pending, now)?;
                    stored.reset_round();
                }
                stored.job.clone()
            }
            None => {
                let job = Job {
                    id: job_id.to_string(),
                    post_id: payload.post_id.clone(),
                    payload,
                    state: JobState::Pending,
                    due_at,
                    attempts: 0,
                    max_attempts: self.policy.max_attempts,
                    revision: 1,
                    claim_id: None,
                    locked_until: None,
                    last_error: None,
                    created_at: now,
                    updated_at: now,
                };
                state.jobs.insert(
                    job_id.to_string(),
                    StoredJob {
                        job: job.clone(),
                        results: BTreeMap::new(),
                        published: false,
                        published_at: None,
                    },
                );
                job
            }
        };

        if job.state == JobState::Pending {
            state.schedule(&job);
        }
        debug!(job_id, revision = job.revision, due_at = %due_at, "Job upserted");

        Ok(JobHandle {
            job_id: job.id,
            post_id: job.post_id,
            due_at,
            revision: job.revision,
            replaced: job.revision > 1,
        })
    }

    async fn record_attempt_result(
        &self,
        job_id: &str,
        result: &PublishResult,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        let stored = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;
        stored.results.insert(result.platform, result.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> SchedulerResult<JobStatusSnapshot> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(job_id)
            .map(StoredJob::snapshot)
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))
    }

    async fn cancel(&self, job_id: &str) -> SchedulerResult<CancelOutcome> {
        let mut state = self.state.lock().await;
        let stored = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;

        match stored.job.state {
            JobState::Pending => {
                stored.transition(JobState::Cancelled, Utc::now())?;
                Ok(CancelOutcome::Cancelled)
            }
            JobState::Active => Ok(CancelOutcome::AlreadyActive),
            other => Ok(CancelOutcome::AlreadyFinished(other)),
        }
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> SchedulerResult<u64> {
        let mut state = self.state.lock().await;
        let before_len = state.jobs.len();
        state.jobs.retain(|_, stored| {
            !(matches!(stored.job.state, JobState::Completed | JobState::Cancelled)
                && stored.job.updated_at < before)
        });
        Ok((before_len - state.jobs.len()) as u64)
    }
}

#[async_trait]
impl SchedulingQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        job_id: &str,
        payload: PostPayload,
        delay: Duration,
    ) -> SchedulerResult<JobHandle> {
        self.upsert(job_id, payload, due_after(Utc::now(), delay))
            .await
    }

    async fn fetch_due(&self) -> SchedulerResult<Option<Job>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        for stored in state.jobs.values_mut() {
            let expired = stored.job.state == JobState::Active
                && stored.job.locked_until.is_some_and(|t| t < now);
            if expired && stored.job.attempts + 1 >= stored.job.max_attempts {
                stored.job.attempts += 1;
                stored.job.last_error = Some(LEASE_EXPIRED.to_string());
                stored.published = false;
                stored.release();
                stored.transition(JobState::Failed, now)?;
                warn!(
                    job_id = %stored.job.id,
                    attempts = stored.job.attempts,
                    "Lease expired on the last attempt, job failed"
                );
            }
        }

        while let Some(Reverse((due_at, _, _))) = state.due.peek() {
            if *due_at > now {
                break;
            }
            let Some(entry) = state.due.pop() else { break };
            if !state.is_live(&entry) {
                continue;
            }
            let Reverse((_, job_id, _)) = entry;
            if let Some(stored) = state.jobs.get_mut(&job_id) {
                return self.claim(stored, now).map(Some);
            }
        }

        // Re-deliver jobs whose worker stopped renewing its lease.
        let expired = state
            .jobs
            .values()
            .filter(|s| {
                s.job.state == JobState::Active && s.job.locked_until.is_some_and(|t| t < now)
            })
            .min_by_key(|s| s.job.due_at)
            .map(|s| s.job.id.clone());

        let Some(job_id) = expired else {
            return Ok(None);
        };
        let Some(stored) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        stored.job.attempts += 1;
        stored.job.last_error = Some(LEASE_EXPIRED.to_string());
        warn!(job_id = %job_id, attempts = stored.job.attempts, "Re-delivering job with expired lease");
        self.claim(stored, now).map(Some)
    }

    async fn next_due_at(&self) -> SchedulerResult<Option<DateTime<Utc>>> {
        let mut state = self.state.lock().await;
        state.drop_stale_heads();

        let next_due = state.due.peek().map(|Reverse((due_at, _, _))| *due_at);
        let next_lease = state
            .jobs
            .values()
            .filter(|s| s.job.state == JobState::Active)
            .filter_map(|s| s.job.locked_until)
            .min();

        Ok(match (next_due, next_lease) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }

    async fn complete(&self, job: &Job) -> SchedulerResult<FinishOutcome> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        if let Some(outcome) = Self::check_claim(&mut state, job, now)? {
            return Ok(outcome);
        }

        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| SchedulerError::NotFound(job.id.clone()))?;
        stored.transition(JobState::Completed, now)?;
        stored.release();
        stored.job.last_error = None;
        stored.published = true;
        stored.published_at.get_or_insert(now);
        Ok(FinishOutcome::Completed)
    }

    async fn fail(
        &self,
        job: &Job,
        error: &str,
        retryable: bool,
    ) -> SchedulerResult<FinishOutcome> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        if let Some(outcome) = Self::check_claim(&mut state, job, now)? {
            return Ok(outcome);
        }

        let attempts = job.attempts + 1;
        let decision = self.policy.decide(attempts, job.max_attempts, retryable);

        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| SchedulerError::NotFound(job.id.clone()))?;
        stored.job.attempts = attempts;
        stored.job.last_error = Some(error.to_string());
        stored.published = false;
        stored.release();

        match decision {
            RetryDecision::RetryAfter(delay) => {
                stored.transition(JobState::Pending, now)?;
                stored.job.due_at = due_after(now, delay);
                let rescheduled = stored.job.clone();
                state.schedule(&rescheduled);
                Ok(FinishOutcome::Retrying {
                    attempt: attempts,
                    delay,
                })
            }
            RetryDecision::GiveUp => {
                stored.transition(JobState::Failed, now)?;
                Ok(FinishOutcome::Failed { attempts })
            }
        }
    }
}
