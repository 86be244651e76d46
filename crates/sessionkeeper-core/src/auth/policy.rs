use std::time::Duration;

/// Primary session window in days when the backend omits an explicit expiry.
const SESSION_WINDOW_DAYS: i64 = 7;

/// Passcode session window in minutes.
/// Short enough that an unattended unlocked phone relocks quickly.
const PASSCODE_SESSION_MINUTES: i64 = 10;

/// Buffer time before expiry to trigger refresh (5 minutes)
const TOKEN_REFRESH_BUFFER_MINUTES: u64 = 5;

/// Interval between session health checks (30 minutes)
const HEALTH_CHECK_INTERVAL_MINUTES: u64 = 30;

/// Maximum refresh attempts before a transient failure becomes a hard expiry.
const MAX_REFRESH_ATTEMPTS: u32 = 3;

/// Initial backoff delay in milliseconds between refresh attempts.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Upper bound for a single backoff delay in milliseconds.
const MAX_BACKOFF_MS: u64 = 8000;

/// Timing rules for the primary and passcode sessions.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub session_window: chrono::Duration,
    pub passcode_window: chrono::Duration,
    pub refresh_buffer: Duration,
    pub health_check_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            session_window: chrono::Duration::days(SESSION_WINDOW_DAYS),
            passcode_window: chrono::Duration::minutes(PASSCODE_SESSION_MINUTES),
            refresh_buffer: Duration::from_secs(TOKEN_REFRESH_BUFFER_MINUTES * 60),
            health_check_interval: Duration::from_secs(HEALTH_CHECK_INTERVAL_MINUTES * 60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded exponential backoff for retryable refresh failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Down-jitter factor (0.25 = up to 25% shorter).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_REFRESH_ATTEMPTS,
            initial_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter = 1.0 - rand::random::<f64>() * self.jitter_factor.clamp(0.0, 1.0);
        Duration::from_secs_f64(capped * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_windows() {
        let policy = SessionPolicy::default();
        assert_eq!(policy.session_window, chrono::Duration::days(7));
        assert_eq!(policy.passcode_window, chrono::Duration::minutes(10));
        assert_eq!(policy.refresh_buffer, Duration::from_secs(300));
        assert_eq!(policy.health_check_interval, Duration::from_secs(1800));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(retry.backoff(1), Duration::from_secs(1));
        assert_eq!(retry.backoff(2), Duration::from_secs(2));
        assert_eq!(retry.backoff(3), Duration::from_secs(4));
        assert_eq!(retry.backoff(5), Duration::from_secs(8));
        assert_eq!(retry.backoff(30), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_jitter_only_shortens() {
        let retry = RetryPolicy::default();
        for _ in 0..50 {
            let delay = retry.backoff(2);
            assert!(delay <= Duration::from_secs(2));
            assert!(delay >= Duration::from_millis(1500));
        }
    }
}
