use governor::{
    clock::{Clock, DefaultClock},
    state::direct::NotKeyed,
    state::InMemoryState,
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

use crate::config::ConfigError;

/// Caps how many job dispatches may start per window.
///
/// A start over budget waits for the next free slot; it is never rejected.
/// Default: 10 starts per second.
#[derive(Clone)]
pub struct DispatchRateLimiter {
    limiter: Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    max_starts: u32,
    window: Duration,
}

impl DispatchRateLimiter {
    pub fn new(max_starts: u32, window: Duration) -> Result<Self, ConfigError> {
        let burst = NonZeroU32::new(max_starts).ok_or_else(|| {
            ConfigError::InvalidRateLimit("at least one start per window is required".to_string())
        })?;
        let quota = window
            .checked_div(max_starts)
            .and_then(Quota::with_period)
            .ok_or_else(|| {
                ConfigError::InvalidRateLimit(format!(
                    "window {:?} is too short for {} starts",
                    window, max_starts
                ))
            })?
            .allow_burst(burst);

        Ok(Self {
            limiter: Arc::new(GovernorRateLimiter::direct(quota)),
            max_starts,
            window,
        })
    }

    pub fn max_starts(&self) -> u32 {
        self.max_starts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Takes a slot if one is free. Otherwise returns how long until one is.
    pub fn check(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|negative| negative.wait_time_from(DefaultClock::default().now()))
    }

    /// Waits until a slot is free, then takes it.
    pub async fn until_ready(&self) {
        if let Err(wait) = self.check() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Dispatch start delayed by rate limit");
            self.limiter.until_ready().await;
        }
    }
}
