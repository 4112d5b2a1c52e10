use async_trait::async_trait;
use postfanout::domain::entities::{Platform, PostPayload, PublishError};
use postfanout::domain::ports::platform_publisher::PlatformPublisher;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Publisher that replays scripted outcomes, then falls back to a default.
pub struct ScriptedPublisher {
    platform: Platform,
    script: Mutex<VecDeque<Result<(), PublishError>>>,
    fallback: Result<(), PublishError>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedPublisher {
    pub fn new(platform: Platform, fallback: Result<(), PublishError>) -> Self {
        Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(platform: Platform) -> Arc<Self> {
        Arc::new(Self::new(platform, Ok(())))
    }

    pub fn failing(platform: Platform, error: PublishError) -> Arc<Self> {
        Arc::new(Self::new(platform, Err(error)))
    }

    pub fn with_script(mut self, outcomes: Vec<Result<(), PublishError>>) -> Self {
        self.script = Mutex::new(outcomes.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformPublisher for ScriptedPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, _payload: &PostPayload) -> Result<(), PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

pub struct PanickingPublisher(pub Platform);

#[async_trait]
impl PlatformPublisher for PanickingPublisher {
    fn platform(&self) -> Platform {
        self.0
    }

    async fn publish(&self, _payload: &PostPayload) -> Result<(), PublishError> {
        panic!("publisher exploded");
    }
}
