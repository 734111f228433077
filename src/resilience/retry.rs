use rand::Rng;
use std::time::Duration;

/// Exponential backoff with random jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total delivery attempts per batch
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the backoff (0.0 - 1.0)
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, without jitter.
    /// Attempt numbers start at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Backoff plus uniform jitter in `[0, jitter_ratio * backoff]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 || backoff.is_zero() {
            return backoff;
        }

        let jitter = rand::thread_rng().gen_range(0.0..=backoff.as_secs_f64() * ratio);
        backoff + Duration::from_secs_f64(jitter)
    }
}
