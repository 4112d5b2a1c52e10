use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::domain::entities::job::JobState;
use crate::domain::entities::platform::Platform;

/// Typed failure returned by a platform publisher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Network, rate-limit or expired credentials. Retried with backoff.
    #[error("{0}")]
    Transient(String),
    /// The platform rejected the post; retrying cannot help.
    #[error("{0}")]
    Permanent(String),
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PublishError::Permanent(_))
    }
}

/// Outcome of one platform attempt for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub platform: Platform,
    pub success: bool,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default = "default_retryable")]
    pub retryable: bool,
}

fn default_retryable() -> bool {
    true
}

impl PublishResult {
    pub fn succeeded(platform: Platform, completed_at: DateTime<Utc>) -> Self {
        Self {
            platform,
            success: true,
            completed_at,
            error_detail: None,
            retryable: true,
        }
    }

    pub fn failed(platform: Platform, completed_at: DateTime<Utc>, error: &PublishError) -> Self {
        Self {
            platform,
            success: false,
            completed_at,
            error_detail: Some(error.to_string()),
            retryable: error.is_retryable(),
        }
    }

    pub fn from_outcome(
        platform: Platform,
        completed_at: DateTime<Utc>,
        outcome: Result<(), PublishError>,
    ) -> Self {
        match outcome {
            Ok(()) => Self::succeeded(platform, completed_at),
            Err(e) => Self::failed(platform, completed_at, &e),
        }
    }
}

/// Persisted per-platform layout read by the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<&PublishResult> for PlatformStatus {
    fn from(result: &PublishResult) -> Self {
        Self {
            published: result.success,
            published_at: result.success.then_some(result.completed_at),
            error: result.error_detail.clone(),
        }
    }
}

/// Aggregate status of a job as exposed to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusSnapshot {
    pub job_id: String,
    pub post_id: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub targets: Vec<Platform>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Latest result per platform. Platforms never attempted are absent.
    pub results: BTreeMap<Platform, PublishResult>,
}

impl JobStatusSnapshot {
    pub fn result_for(&self, platform: Platform) -> Option<&PublishResult> {
        self.results.get(&platform)
    }

    /// Targets whose latest result is not a success.
    pub fn unpublished_targets(&self) -> Vec<Platform> {
        self.targets
            .iter()
            .copied()
            .filter(|p| !self.results.get(p).is_some_and(|r| r.success))
            .collect()
    }

    pub fn all_targets_published(&self) -> bool {
        self.unpublished_targets().is_empty()
    }

    pub fn publishing_status(&self) -> BTreeMap<Platform, PlatformStatus> {
        self.results
            .iter()
            .map(|(platform, result)| (*platform, PlatformStatus::from(result)))
            .collect()
    }
}
