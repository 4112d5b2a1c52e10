use std::str::FromStr;
use std::time::Duration;

/// Job-level retry behaviour applied by the scheduling queue when an attempt
/// does not publish to every target platform.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Attempts allowed before a job becomes `Failed`.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied per additional attempt.
    pub multiplier: f64,
    /// Upper bound on any single retry delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl BackoffPolicy {
    /// Delay before the next attempt once `attempts_made` attempts have failed.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }

    /// `attempts_made` already includes the attempt that just failed.
    pub fn decide(&self, attempts_made: u32, max_attempts: u32, retryable: bool) -> RetryDecision {
        if !retryable || attempts_made >= max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.delay_for(attempts_made))
        }
    }
}

/// Which platforms a retry attempt publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryScope {
    /// Only platforms without a successful result yet.
    #[default]
    FailedOnly,
    /// Every target platform, including ones already published.
    AllPlatforms,
}

impl RetryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryScope::FailedOnly => "failed",
            RetryScope::AllPlatforms => "all",
        }
    }
}

impl FromStr for RetryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "failed" => Ok(RetryScope::FailedOnly),
            "all" => Ok(RetryScope::AllPlatforms),
            other => Err(format!("unknown retry scope '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_doubles_from_one_second() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy {
            max_delay: Duration::from_secs(5),
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_gives_up_at_attempt_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.decide(1, 3, true),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy.decide(2, 3, true),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(policy.decide(3, 3, true), RetryDecision::GiveUp);
    }

    #[test]
    fn test_non_retryable_gives_up_immediately() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.decide(1, 3, false), RetryDecision::GiveUp);
    }

    #[test]
    fn test_retry_scope_parsing() {
        assert_eq!("failed".parse::<RetryScope>().unwrap(), RetryScope::FailedOnly);
        assert_eq!(" ALL ".parse::<RetryScope>().unwrap(), RetryScope::AllPlatforms);
        assert!("some".parse::<RetryScope>().is_err());
        assert_eq!(RetryScope::default(), RetryScope::FailedOnly);
    }
}
