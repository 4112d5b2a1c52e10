use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::entities::post::PostPayload;
use crate::domain::errors::SchedulerError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(SchedulerError::Storage(format!(
                "unknown job state '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid job transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Validates a lifecycle transition.
///
/// `Active -> Pending` covers both a backoff retry and a superseded attempt.
/// `Pending -> Pending` is a reschedule before dispatch. Terminal states only
/// leave through a fresh submission.
pub fn validate_transition(from: JobState, to: JobState) -> Result<(), InvalidTransition> {
    use JobState::*;

    match (from, to) {
        (Pending, Active) => Ok(()),
        (Pending, Pending) => Ok(()),
        (Pending, Cancelled) => Ok(()),
        (Active, Completed) => Ok(()),
        (Active, Failed) => Ok(()),
        (Active, Pending) => Ok(()),
        (Active, Active) => Ok(()),
        (Completed, Pending) | (Failed, Pending) | (Cancelled, Pending) => Ok(()),
        _ => Err(InvalidTransition { from, to }),
    }
}

/// A scheduled publish fan-out for a single post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub post_id: String,
    pub payload: PostPayload,
    pub state: JobState,
    pub due_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Bumped on every submission for this id.
    pub revision: i64,
    /// Lease held by the worker that claimed the job.
    pub claim_id: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returned by an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_id: String,
    pub post_id: String,
    pub due_at: DateTime<Utc>,
    pub revision: i64,
    /// True when an existing job with the same id was replaced.
    pub replaced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Dispatch already started; it will run to completion.
    AlreadyActive,
    AlreadyFinished(JobState),
}
