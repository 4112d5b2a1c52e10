use crate::domain::entities::{Platform, PostPayload, PublishError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Publishes a post to one platform.
///
/// Implementations are called concurrently and must not share mutable state
/// across calls. Every underlying failure comes back as a `PublishError`;
/// retries belong to the dispatcher.
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    fn platform(&self) -> Platform;

    async fn publish(&self, payload: &PostPayload) -> Result<(), PublishError>;
}

/// One publisher per platform.
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn PlatformPublisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `publisher` under its own platform, replacing any previous one.
    pub fn register(&mut self, publisher: Arc<dyn PlatformPublisher>) -> &mut Self {
        self.publishers.insert(publisher.platform(), publisher);
        self
    }

    pub fn with(mut self, publisher: Arc<dyn PlatformPublisher>) -> Self {
        self.register(publisher);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformPublisher>> {
        self.publishers.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<_> = self.publishers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}
