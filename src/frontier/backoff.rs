use rand::Rng;
use std::time::Duration;

/// One hour, the default delay before the first retry of a failed URL
pub const DEFAULT_INITIAL_RETRY: Duration = Duration::from_secs(60 * 60);

/// One year, the default recrawl cooldown and first-schedule jitter window
pub const DEFAULT_RECRAWL_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How long a claim reserves an entry before it becomes claimable again
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);

/// Computes when a frontier entry becomes eligible again
///
/// All times are Unix milliseconds so that the same arithmetic serves the
/// SQLite columns and the Redis scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    initial_retry: Duration,
    recrawl_interval: Duration,
    jitter_window: Duration,
    lock_duration: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            initial_retry: DEFAULT_INITIAL_RETRY,
            recrawl_interval: DEFAULT_RECRAWL_INTERVAL,
            jitter_window: DEFAULT_RECRAWL_INTERVAL,
            lock_duration: DEFAULT_LOCK_DURATION,
        }
    }
}

impl RetrySchedule {
    pub fn new(initial_retry: Duration, recrawl_interval: Duration) -> Self {
        Self {
            initial_retry,
            recrawl_interval,
            ..Self::default()
        }
    }

    pub fn with_jitter_window(mut self, window: Duration) -> Self {
        self.jitter_window = window;
        self
    }

    pub fn with_lock_duration(mut self, lock: Duration) -> Self {
        self.lock_duration = lock;
        self
    }

    pub fn initial_retry(&self) -> Duration {
        self.initial_retry
    }

    pub fn lock_duration_ms(&self) -> i64 {
        duration_ms(self.lock_duration)
    }

    /// `initial_retry * 2^(num_errors - 1)`, saturating
    pub fn retry_delay_ms(&self, num_errors: u32) -> i64 {
        let exponent = num_errors.saturating_sub(1).min(40);
        duration_ms(self.initial_retry).saturating_mul(1i64 << exponent)
    }

    /// Eligibility of a never-attempted URL: now, pulled back by a random
    /// offset within the jitter window so fresh batches interleave
    pub fn first_schedule_ms(&self, now_ms: i64) -> i64 {
        let window = duration_ms(self.jitter_window);
        if window <= 0 {
            return now_ms;
        }
        now_ms - rand::thread_rng().gen_range(0..window)
    }

    pub fn failure_schedule_ms(&self, now_ms: i64, num_errors: u32) -> i64 {
        now_ms.saturating_add(self.retry_delay_ms(num_errors))
    }

    pub fn success_schedule_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_add(duration_ms(self.recrawl_interval))
    }

    pub fn claim_until_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_add(self.lock_duration_ms())
    }
}

pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
