use std::time::{Duration, Instant};

use crate::error::{GuardError, GuardResult};

/// Who is making a password attempt; each caller gets its own attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    /// In-process callers such as the daemon itself
    Local,
    /// A socket peer, identified by its uid
    User(u32),
    /// A connection with no OS identity (named pipe clients)
    Connection(u64),
}

/// Rate limiter for password attempts
pub struct RateLimiter {
    attempts: Vec<Instant>,
    max_attempts: usize,
    window_duration: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Vec::new(),
            max_attempts,
            window_duration: window,
        }
    }

    /// Record an attempt, or fail with `RateLimited` carrying the wait in seconds
    pub fn check(&mut self) -> GuardResult<()> {
        let now = Instant::now();

        // Remove old attempts outside the window
        self.attempts
            .retain(|&attempt| now.duration_since(attempt) < self.window_duration);

        if self.attempts.len() < self.max_attempts {
            self.attempts.push(now);
            Ok(())
        } else {
            let wait = self.time_until_allowed().unwrap_or(self.window_duration);
            Err(GuardError::RateLimited(wait.as_secs().max(1)))
        }
    }

    /// Get time until next attempt is allowed
    pub fn time_until_allowed(&self) -> Option<Duration> {
        if self.attempts.len() < self.max_attempts {
            return None;
        }

        let oldest = self.attempts.first()?;
        let elapsed = Instant::now().duration_since(*oldest);

        if elapsed < self.window_duration {
            Some(self.window_duration - elapsed)
        } else {
            None
        }
    }

    /// Forget earlier attempts, after a successful one
    pub fn reset(&mut self) {
        self.attempts.clear();
    }

    /// No attempt inside the current window
    pub fn is_idle(&self) -> bool {
        self.attempts
            .last()
            .is_none_or(|last| last.elapsed() >= self.window_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_attempts() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());

        let err = limiter.check().unwrap_err();
        assert_eq!(err.kind(), "RateLimited");
        assert!(matches!(err, GuardError::RateLimited(secs) if secs > 0 && secs <= 60));
    }

    #[test]
    fn test_rate_limiter_reset() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        limiter.reset();
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_rate_limiter_idle() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(100));
        assert!(limiter.is_idle());

        limiter.check().unwrap();
        assert!(!limiter.is_idle());

        std::thread::sleep(Duration::from_millis(150));
        assert!(limiter.is_idle());
    }

    #[test]
    fn test_rate_limiter_window_expiry() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(200));

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        std::thread::sleep(Duration::from_millis(300));

        assert!(limiter.check().is_ok());
    }
}
