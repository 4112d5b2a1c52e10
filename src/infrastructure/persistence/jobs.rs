use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::entities::{
    CancelOutcome, Job, JobHandle, JobState, JobStatusSnapshot, Platform, PostPayload,
    PublishResult,
};
use crate::domain::errors::{SchedulerError, SchedulerResult};
use crate::domain::ports::job_store::JobStore;
use crate::domain::ports::task_queue::{FinishOutcome, SchedulingQueue};
use crate::domain::services::{due_after, BackoffPolicy, RetryDecision};
use crate::infrastructure::persistence::{format_ts, parse_ts, Database};

const LEASE_EXPIRED: &str = "lease expired before the attempt finished";

const JOB_COLUMNS: &str = "id, post_id, payload, state, due_at, attempts, max_attempts, revision, \
                           claim_id, locked_until, last_error, published, published_at, \
                           created_at, updated_at";

/// Durable job store and scheduling queue over SQLite.
#[derive(Clone)]
pub struct SqliteJobQueue {
    db: Database,
    policy: BackoffPolicy,
    lease_timeout: Duration,
}

impl SqliteJobQueue {
    pub fn new(db: Database, policy: BackoffPolicy, lease_timeout: Duration) -> Self {
        Self {
            db,
            policy,
            lease_timeout,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// The finalizing update matched nothing: either the job was resubmitted
    /// while we held it, or our lease is gone.
    async fn release_superseded(&self, job: &Job) -> SchedulerResult<FinishOutcome> {
        let now = format_ts(Utc::now());
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE publish_jobs
             SET state = 'pending', attempts = 0, published = 0, last_error = NULL,
                 claim_id = NULL, locked_until = NULL, updated_at = ?
             WHERE id = ? AND claim_id = ? AND state = 'active'",
        )
        .bind(&now)
        .bind(&job.id)
        .bind(job.claim_id.as_deref())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            warn!(job_id = %job.id, "Lease lost before the attempt was finalized");
            return Ok(FinishOutcome::LeaseLost);
        }

        // Results of the superseded attempt belong to the old payload.
        sqlx::query("DELETE FROM publish_results WHERE job_id = ?")
            .bind(&job.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(job_id = %job.id, "Job was resubmitted during dispatch; rescheduled");
        Ok(FinishOutcome::Superseded)
    }

    /// Expired leases count as a failed attempt. Jobs that have used up their
    /// attempts this way are failed instead of being handed out again.
    async fn fail_exhausted_leases(&self, now: &str) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE publish_jobs
             SET state = 'failed', attempts = attempts + 1, last_error = ?, published = 0,
                 claim_id = NULL, locked_until = NULL, updated_at = ?
             WHERE state = 'active' AND locked_until < ? AND attempts + 1 >= max_attempts",
        )
        .bind(LEASE_EXPIRED)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            warn!(
                count = result.rows_affected(),
                "Failed jobs whose leases expired on their last attempt"
            );
        }
        Ok(())
    }

    async fn load_results(&self, job_id: &str) -> SchedulerResult<BTreeMap<Platform, PublishResult>> {
        let rows = sqlx::query(
            "SELECT platform, success, completed_at, error_detail, retryable
             FROM publish_results WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut results = BTreeMap::new();
        for row in rows {
            let platform: Platform = row.try_get::<String, _>("platform")?.parse()?;
            let completed_at: String = row.try_get("completed_at")?;
            results.insert(
                platform,
                PublishResult {
                    platform,
                    success: row.try_get::<i64, _>("success")? != 0,
                    completed_at: parse_ts(&completed_at)?,
                    error_detail: row
                        .try_get::<Option<String>, _>("error_detail")
                        .ok()
                        .flatten(),
                    retryable: row.try_get::<i64, _>("retryable")? != 0,
                },
            );
        }
        Ok(results)
    }
}

fn job_from_row(row: &AnyRow) -> SchedulerResult<Job> {
    let payload: String = row.try_get("payload")?;
    let state: String = row.try_get("state")?;
    let due_at: String = row.try_get("due_at")?;
    let locked_until = row
        .try_get::<Option<String>, _>("locked_until")
        .ok()
        .flatten();
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Job {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        payload: serde_json::from_str(&payload)?,
        state: state.parse()?,
        due_at: parse_ts(&due_at)?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        revision: row.try_get("revision")?,
        claim_id: row.try_get::<Option<String>, _>("claim_id").ok().flatten(),
        locked_until: locked_until.as_deref().map(parse_ts).transpose()?,
        last_error: row.try_get::<Option<String>, _>("last_error").ok().flatten(),
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[async_trait]
impl JobStore for SqliteJobQueue {
    async fn upsert(
        &self,
        job_id: &str,
        payload: PostPayload,
        due_at: DateTime<Utc>,
    ) -> SchedulerResult<JobHandle> {
        payload.validate()?;
        let now = format_ts(Utc::now());
        let payload_str = serde_json::to_string(&payload)?;

        let mut tx = self.db.pool().begin().await?;

        // An active job keeps running; its revision bump is noticed when it finalizes.
        let row = sqlx::query(
            "INSERT INTO publish_jobs
                (id, post_id, payload, state, due_at, attempts, max_attempts, revision, created_at, updated_at)
             VALUES (?, ?, ?, 'pending', ?, 0, ?, 1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                post_id = excluded.post_id,
                payload = excluded.payload,
                due_at = excluded.due_at,
                max_attempts = excluded.max_attempts,
                revision = publish_jobs.revision + 1,
                updated_at = excluded.updated_at,
                state = CASE WHEN publish_jobs.state = 'active' THEN 'active' ELSE 'pending' END,
                attempts = CASE WHEN publish_jobs.state = 'active' THEN publish_jobs.attempts ELSE 0 END,
                last_error = CASE WHEN publish_jobs.state = 'active' THEN publish_jobs.last_error ELSE NULL END,
                published = CASE WHEN publish_jobs.state = 'active' THEN publish_jobs.published ELSE 0 END
             RETURNING revision, state",
        )
        .bind(job_id)
        .bind(&payload.post_id)
        .bind(&payload_str)
        .bind(format_ts(due_at))
        .bind(self.policy.max_attempts as i64)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        let revision: i64 = row.try_get("revision")?;
        let state: String = row.try_get("state")?;

        // A new submission starts a fresh fan-out; an active one is cleared when it finalizes.
        if state == JobState::Pending.as_str() {
            sqlx::query("DELETE FROM publish_results WHERE job_id = ?")
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(job_id, revision, due_at = %due_at, "Job upserted");

        Ok(JobHandle {
            job_id: job_id.to_string(),
            post_id: payload.post_id,
            due_at,
            revision,
            replaced: revision > 1,
        })
    }

    async fn record_attempt_result(
        &self,
        job_id: &str,
        result: &PublishResult,
    ) -> SchedulerResult<()> {
        // Row-per-platform upsert: concurrent writers for different platforms never
        // overwrite each other.
        let outcome = sqlx::query(
            "INSERT INTO publish_results (job_id, platform, success, completed_at, error_detail, retryable)
             SELECT ?, ?, ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM publish_jobs WHERE id = ?)
             ON CONFLICT(job_id, platform) DO UPDATE SET
                success = excluded.success,
                completed_at = excluded.completed_at,
                error_detail = excluded.error_detail,
                retryable = excluded.retryable",
        )
        .bind(job_id)
        .bind(result.platform.as_str())
        .bind(result.success as i64)
        .bind(format_ts(result.completed_at))
        .bind(result.error_detail.as_deref())
        .bind(result.retryable as i64)
        .bind(job_id)
        .execute(self.db.pool())
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(SchedulerError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, job_id: &str) -> SchedulerResult<JobStatusSnapshot> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM publish_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;

        let job = job_from_row(&row)?;
        let published_at = row
            .try_get::<Option<String>, _>("published_at")
            .ok()
            .flatten();
        let results = self.load_results(job_id).await?;

        Ok(JobStatusSnapshot {
            job_id: job.id,
            post_id: job.post_id,
            state: job.state,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            targets: job.payload.platforms,
            published: row.try_get::<i64, _>("published")? != 0,
            published_at: published_at.as_deref().map(parse_ts).transpose()?,
            last_error: job.last_error,
            results,
        })
    }

    async fn cancel(&self, job_id: &str) -> SchedulerResult<CancelOutcome> {
        let result = sqlx::query(
            "UPDATE publish_jobs SET state = 'cancelled', updated_at = ?
             WHERE id = ? AND state = 'pending'",
        )
        .bind(format_ts(Utc::now()))
        .bind(job_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(CancelOutcome::Cancelled);
        }

        let state: String = sqlx::query("SELECT state FROM publish_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?
            .try_get("state")?;

        match state.parse::<JobState>()? {
            JobState::Active => Ok(CancelOutcome::AlreadyActive),
            other => Ok(CancelOutcome::AlreadyFinished(other)),
        }
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> SchedulerResult<u64> {
        let cutoff = format_ts(before);
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            "DELETE FROM publish_results WHERE job_id IN (
                SELECT id FROM publish_jobs
                WHERE state IN ('completed', 'cancelled') AND updated_at < ?)",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query(
            "DELETE FROM publish_jobs WHERE state IN ('completed', 'cancelled') AND updated_at < ?",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }
}

#[async_trait]
impl SchedulingQueue for SqliteJobQueue {
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
        let now_str = format_ts(now);
        let lease_until = format_ts(due_after(now, self.lease_timeout));
        let claim_id = Uuid::new_v4().to_string();

        self.fail_exhausted_leases(&now_str).await?;

        // Select and claim in one statement; the repeated predicate makes the
        // update a no-op if another worker claimed the row first.
        let row = sqlx::query(&format!(
            "UPDATE publish_jobs
             SET attempts = CASE WHEN state = 'active' THEN attempts + 1 ELSE attempts END,
                 last_error = CASE WHEN state = 'active' THEN ? ELSE last_error END,
                 state = 'active', claim_id = ?, locked_until = ?, updated_at = ?
             WHERE id = (
                 SELECT id FROM publish_jobs
                 WHERE (state = 'pending' AND due_at <= ?)
                    OR (state = 'active' AND locked_until < ?)
                 ORDER BY due_at ASC
                 LIMIT 1
             )
             AND ((state = 'pending' AND due_at <= ?) OR (state = 'active' AND locked_until < ?))
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(LEASE_EXPIRED)
        .bind(&claim_id)
        .bind(&lease_until)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .fetch_optional(self.db.pool())
        .await?;

        let job = row.as_ref().map(job_from_row).transpose()?;
        if let Some(job) = job.as_ref().filter(|j| j.last_error.as_deref() == Some(LEASE_EXPIRED)) {
            warn!(job_id = %job.id, attempts = job.attempts, "Re-delivering job with expired lease");
        }
        Ok(job)
    }

    async fn next_due_at(&self) -> SchedulerResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MIN(t) AS next_at FROM (
                SELECT due_at AS t FROM publish_jobs WHERE state = 'pending'
                UNION ALL
                SELECT locked_until AS t FROM publish_jobs WHERE state = 'active'
             )",
        )
        .fetch_one(self.db.pool())
        .await?;

        let next_at = row.try_get::<Option<String>, _>("next_at").ok().flatten();
        next_at.as_deref().map(parse_ts).transpose()
    }

    async fn complete(&self, job: &Job) -> SchedulerResult<FinishOutcome> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            "UPDATE publish_jobs
             SET state = 'completed', published = 1, published_at = COALESCE(published_at, ?),
                 last_error = NULL, claim_id = NULL, locked_until = NULL, updated_at = ?
             WHERE id = ? AND claim_id = ? AND revision = ? AND state = 'active'",
        )
        .bind(&now)
        .bind(&now)
        .bind(&job.id)
        .bind(job.claim_id.as_deref())
        .bind(job.revision)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return self.release_superseded(job).await;
        }
        Ok(FinishOutcome::Completed)
    }

    async fn fail(
        &self,
        job: &Job,
        error: &str,
        retryable: bool,
    ) -> SchedulerResult<FinishOutcome> {
        let now = Utc::now();
        let attempts = job.attempts + 1;

        let (result, outcome) = match self.policy.decide(attempts, job.max_attempts, retryable) {
            RetryDecision::RetryAfter(delay) => {
                let result = sqlx::query(
                    "UPDATE publish_jobs
                     SET state = 'pending', attempts = ?, last_error = ?, due_at = ?, published = 0,
                         claim_id = NULL, locked_until = NULL, updated_at = ?
                     WHERE id = ? AND claim_id = ? AND revision = ? AND state = 'active'",
                )
                .bind(attempts as i64)
                .bind(error)
                .bind(format_ts(due_after(now, delay)))
                .bind(format_ts(now))
                .bind(&job.id)
                .bind(job.claim_id.as_deref())
                .bind(job.revision)
                .execute(self.db.pool())
                .await?;
                (
                    result,
                    FinishOutcome::Retrying {
                        attempt: attempts,
                        delay,
                    },
                )
            }
            RetryDecision::GiveUp => {
                let result = sqlx::query(
                    "UPDATE publish_jobs
                     SET state = 'failed', attempts = ?, last_error = ?, published = 0,
                         claim_id = NULL, locked_until = NULL, updated_at = ?
                     WHERE id = ? AND claim_id = ? AND revision = ? AND state = 'active'",
                )
                .bind(attempts as i64)
                .bind(error)
                .bind(format_ts(now))
                .bind(&job.id)
                .bind(job.claim_id.as_deref())
                .bind(job.revision)
                .execute(self.db.pool())
                .await?;
                (result, FinishOutcome::Failed { attempts })
            }
        };

        if result.rows_affected() == 0 {
            return self.release_superseded(job).await;
        }
        Ok(outcome)
    }
}
