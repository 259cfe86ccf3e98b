use std::time::Duration;

/// Per-call retry and timeout settings. Cloning is cheap because the
/// structure only stores durations, numbers, and booleans, allowing the
/// engine to snapshot settings at perform time.
#[derive(Clone, Debug)]
pub struct RetrySettings {
    /// Whether the engine may issue more than one physical attempt.
    pub retry_allowed: bool,
    /// Base of the exponential backoff schedule: the n-th retry waits
    /// between `base^n` and `base^(n+1)` seconds, jittered.
    pub retry_delay_base: Duration,
    /// Bound on a single physical attempt, enforced by the transport.
    pub timeout: Duration,
    /// Overall deadline across all attempts of one logical call.
    pub timeout_window: Duration,
    /// Key into the process-wide Retry-After cache; 0 disables caching.
    pub retry_after_cache_id: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retry_allowed: true,
            retry_delay_base: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            timeout_window: Duration::from_secs(20),
            retry_after_cache_id: 0,
        }
    }
}
