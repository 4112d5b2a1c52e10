use async_trait::async_trait;
use std::time::Duration;

use crate::domain::entities::{Platform, PostPayload, PublishError};
use crate::domain::ports::platform_publisher::PlatformPublisher;

/// Stand-in for a real platform integration: waits for a fixed latency, then
/// succeeds or returns the configured failure.
#[derive(Debug, Clone)]
pub struct SimulatedPublisher {
    platform: Platform,
    latency: Duration,
    failure: Option<PublishError>,
}

impl SimulatedPublisher {
    pub fn new(platform: Platform, latency: Duration) -> Self {
        Self {
            platform,
            latency,
            failure: None,
        }
    }

    pub fn failing(platform: Platform, latency: Duration, failure: PublishError) -> Self {
        Self {
            platform,
            latency,
            failure: Some(failure),
        }
    }

    /// Latencies of the original mock integrations.
    pub fn for_platform(platform: Platform) -> Self {
        let latency = match platform {
            Platform::Instagram => Duration::from_millis(1000),
            Platform::Twitter => Duration::from_millis(800),
            Platform::Linkedin => Duration::from_millis(1200),
        };
        Self::new(platform, latency)
    }
}

#[async_trait]
impl PlatformPublisher for SimulatedPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, payload: &PostPayload) -> Result<(), PublishError> {
        tracing::info!(
            platform = %self.platform,
            post_id = %payload.post_id,
            "Publishing post: {}",
            payload.caption
        );
        tokio::time::sleep(self.latency).await;

        match &self.failure {
            Some(failure) => {
                tracing::warn!(
                    platform = %self.platform,
                    post_id = %payload.post_id,
                    "Simulated publish failure: {}",
                    failure
                );
                Err(failure.clone())
            }
            None => {
                tracing::debug!(
                    platform = %self.platform,
                    post_id = %payload.post_id,
                    "Simulated publish succeeded"
                );
                Ok(())
            }
        }
    }
}
