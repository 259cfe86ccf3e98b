use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::RetrySettings;
use crate::error::{E_HC_NO_NETWORK, HResult, S_OK};
use crate::headers::HeaderMap;

/// Hard cap on any computed backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(60);
/// Floor applied when the server answered 500 Internal Server Error.
const MIN_DELAY_FOR_HTTP_INTERNAL_ERROR: Duration = Duration::from_millis(10_000);
/// Minimum window worth issuing another attempt into.
const MIN_HTTP_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Classification result: whether to retry and how long to wait first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn no_retry() -> Self {
        RetryDecision {
            retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Everything the classifier looks at for one completed attempt.
pub struct RetryInput<'a> {
    pub status_code: u32,
    pub network_error_code: HResult,
    pub response_headers: &'a HeaderMap,
    /// Number of the attempt that just finished (1-based).
    pub attempt_number: u32,
    pub response_received_time: Instant,
    pub perform_start_time: Instant,
    pub settings: &'a RetrySettings,
    /// Deterministic pseudo-jitter in [0, 1). Derived from the wall clock
    /// at response time in production; tests pin it.
    pub jitter_scaler: f64,
}

/// Jitter scaler used by the engine: the sub-10µs tail of the wall clock at
/// response time, spread over [0, 1).
pub fn clock_jitter_scaler() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    (nanos % 10_000) as f64 / 10_000.0
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("Retry-After")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn lerp(min: f64, max: f64, scaler: f64) -> f64 {
    min + (max - min) * scaler
}

/// Whether an attempt outcome is even a candidate for retry handling:
/// retries enabled, not the permanent no-network signal, and either a
/// transient status or a transport-level failure. Cache writes share this
/// gate with `evaluate`, so a non-retryable status (451, say) never
/// poisons the retry-after cache.
fn eligible_for_retry(input: &RetryInput<'_>) -> bool {
    input.settings.retry_allowed
        && input.network_error_code != E_HC_NO_NETWORK
        && (matches!(input.status_code, 408 | 429 | 500 | 502 | 503 | 504)
            || input.network_error_code != S_OK)
}

/// Pure retry classification for one finished attempt.
///
/// Retryable outcomes are 408/429/500/502/503/504 or any transport-level
/// failure other than the permanent no-network signal. The delay lerps
/// between `base^n` and `base^(n+1)` seconds using the supplied jitter
/// scaler, capped at one minute, floored by a jittered `Retry-After` when
/// the server sent one, and floored at ten seconds after a 500. A retry is
/// only approved when enough of the timeout window remains to be worth it.
pub fn evaluate(input: &RetryInput<'_>) -> RetryDecision {
    if !eligible_for_retry(input) {
        return RetryDecision::no_retry();
    }

    let elapsed = input
        .response_received_time
        .saturating_duration_since(input.perform_start_time);
    let remaining = input.settings.timeout_window.saturating_sub(elapsed);

    let base = input.settings.retry_delay_base.as_secs_f64();
    let wait_min_secs = base.powi(input.attempt_number as i32);
    let wait_max_secs = base.powi(input.attempt_number as i32 + 1);
    let wait_secs = lerp(wait_min_secs, wait_max_secs, input.jitter_scaler)
        .min(MAX_DELAY.as_secs_f64());
    let mut delay = Duration::from_secs_f64(wait_secs);

    if let Some(retry_after) = retry_after_seconds(input.response_headers) {
        // Jitter Retry-After by up to 20% to spread the herd, then take
        // whichever of the two schedules is later.
        let ra_min = retry_after.as_millis() as f64;
        let ra_jittered =
            Duration::from_millis(lerp(ra_min, ra_min * 1.2, input.jitter_scaler) as u64);
        delay = delay.max(ra_jittered);
    }

    if input.status_code == 500 {
        delay = delay.max(MIN_DELAY_FOR_HTTP_INTERNAL_ERROR);
    }

    let retry = remaining > MIN_HTTP_TIMEOUT && remaining >= delay + MIN_HTTP_TIMEOUT;

    RetryDecision { retry, delay }
}

/// One remembered cool-down for an endpoint group.
#[derive(Debug, Clone, Copy)]
pub struct RetryAfterState {
    /// Earliest moment another attempt against the endpoint makes sense.
    pub retry_after_time: Instant,
    /// Status code of the most recent failure.
    pub status_code: u32,
    /// Whether some call is already waiting out the window; used to fail
    /// subsequent callers fast instead of queueing a flood.
    pub call_pending: bool,
}

/// Process-wide `cacheId -> cool-down` table, shared by every call that
/// opts in with a non-zero cache id.
#[derive(Default)]
pub struct RetryAfterCache {
    entries: Mutex<HashMap<u32, RetryAfterState>>,
}

impl RetryAfterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cache_id: u32) -> Option<RetryAfterState> {
        self.entries.lock().unwrap().get(&cache_id).copied()
    }

    pub fn set(&self, cache_id: u32, state: RetryAfterState) {
        self.entries.lock().unwrap().insert(cache_id, state);
    }

    pub fn clear(&self, cache_id: u32) {
        self.entries.lock().unwrap().remove(&cache_id);
    }

    /// Drops the pending mark while keeping the cool-down window. Called
    /// when the perform that marked the entry completes, so later callers
    /// are not gated on a call that no longer exists.
    pub fn clear_pending(&self, cache_id: u32) {
        if let Some(state) = self.entries.lock().unwrap().get_mut(&cache_id) {
            state.call_pending = false;
        }
    }

    /// Read-modify-write access under a single lock hold, for decisions
    /// that must not race concurrent callers (the fail-fast pre-check).
    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut HashMap<u32, RetryAfterState>) -> T) -> T {
        f(&mut self.entries.lock().unwrap())
    }
}

/// Records a failure carrying `Retry-After` so follow-up calls against the
/// same cache id can wait or fail fast instead of hammering the endpoint.
/// Only outcomes the retry path itself considers (see `eligible_for_retry`)
/// are remembered.
pub(crate) fn remember_retry_after(
    cache: &RetryAfterCache,
    input: &RetryInput<'_>,
    decision: &RetryDecision,
) {
    if !eligible_for_retry(input) {
        return;
    }
    let cache_id = input.settings.retry_after_cache_id;
    if cache_id == 0 || input.status_code <= 400 {
        return;
    }
    let Some(retry_after) = retry_after_seconds(input.response_headers) else {
        return;
    };
    cache.set(
        cache_id,
        RetryAfterState {
            retry_after_time: input.response_received_time + retry_after,
            status_code: input.status_code,
            call_pending: decision.retry,
        },
    );
}
