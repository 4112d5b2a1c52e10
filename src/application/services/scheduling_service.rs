use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::domain::entities::{
    CancelOutcome, JobHandle, JobStatusSnapshot, Platform, PlatformOptions, PostPayload,
};
use crate::domain::errors::{SchedulerError, SchedulerResult};
use crate::domain::ports::job_store::JobStore;
use crate::domain::ports::task_queue::SchedulingQueue;
use crate::domain::ports::time_service::TimeService;
use crate::domain::services::compute_delay;

/// Submission as received from the API layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePostRequest {
    pub post_id: String,
    pub caption: String,
    #[serde(default)]
    pub media: Option<String>,
    pub platforms: Vec<String>,
    /// ISO 8601 / RFC 3339 timestamp with offset.
    pub scheduled_at: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub platform_specific: Option<Value>,
}

/// Entry point for producers and status readers. Holds no state of its own.
#[derive(Clone)]
pub struct SchedulingService {
    queue: Arc<dyn SchedulingQueue>,
    store: Arc<dyn JobStore>,
    time_service: Arc<dyn TimeService>,
}

impl SchedulingService {
    pub fn new(
        queue: Arc<dyn SchedulingQueue>,
        store: Arc<dyn JobStore>,
        time_service: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            queue,
            store,
            time_service,
        }
    }

    /// Schedules `request` and returns the job id, which is the post id.
    /// Scheduling the same post again moves the existing job.
    pub async fn schedule_post(&self, request: SchedulePostRequest) -> SchedulerResult<String> {
        self.submit(request).await.map(|handle| handle.job_id)
    }

    pub async fn submit(&self, request: SchedulePostRequest) -> SchedulerResult<JobHandle> {
        let due_at = parse_scheduled_at(&request.scheduled_at)?;
        let platforms = request
            .platforms
            .iter()
            .map(|p| p.parse::<Platform>())
            .collect::<Result<Vec<_>, _>>()?;
        let platform_options = match &request.platform_specific {
            Some(value) => PlatformOptions::parse_map(value)?,
            None => Vec::new(),
        };

        let payload = PostPayload {
            post_id: request.post_id.trim().to_string(),
            caption: request.caption,
            media: request.media.filter(|m| !m.trim().is_empty()),
            platforms,
            owner_id: request.owner_id,
            platform_options,
        };
        payload.validate()?;

        let delay = compute_delay(self.time_service.now(), due_at);
        let job_id = payload.post_id.clone();
        let handle = self.queue.enqueue(&job_id, payload, delay).await?;

        tracing::info!(
            job_id = %handle.job_id,
            due_at = %handle.due_at,
            delay_ms = delay.as_millis() as u64,
            replaced = handle.replaced,
            "Post scheduled"
        );
        Ok(handle)
    }

    pub async fn get_job_status(&self, job_id: &str) -> SchedulerResult<JobStatusSnapshot> {
        self.store.get(job_id).await
    }

    pub async fn cancel_post(&self, job_id: &str) -> SchedulerResult<CancelOutcome> {
        let outcome = self.store.cancel(job_id).await?;
        match &outcome {
            CancelOutcome::Cancelled => tracing::info!(job_id, "Scheduled post cancelled"),
            CancelOutcome::AlreadyActive => {
                tracing::warn!(job_id, "Cancel requested while publishing, dispatch continues")
            }
            CancelOutcome::AlreadyFinished(state) => {
                tracing::debug!(job_id, %state, "Cancel requested for finished job")
            }
        }
        Ok(outcome)
    }
}

fn parse_scheduled_at(raw: &str) -> SchedulerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            SchedulerError::Validation(format!(
                "Invalid scheduled time '{}', expected ISO 8601",
                raw
            ))
        })
}
