use std::time::{Duration, Instant};

use hc_core::task::AsyncOp;
use hc_core::{Call, Mock};

use crate::common::Env;

fn always_mock(url: &str, status: u32) -> hc_core::MockHandle {
    let mock = Mock::new().unwrap();
    mock.set_status_code(status);
    hc_core::add_mock(&mock, "GET", url, b"").unwrap();
    mock
}

/// Registers a mock that unregisters itself after its first match, so the
/// next attempt falls through to whatever was registered beneath it.
fn one_shot_mock(url: &str, status: u32, retry_after: Option<&str>) -> hc_core::MockHandle {
    let mock = Mock::new().unwrap();
    mock.set_status_code(status);
    if let Some(seconds) = retry_after {
        mock.set_response_header("Retry-After", seconds);
    }
    mock.set_matched_callback(|mock, _method, _url, _body| {
        hc_core::remove_mock(mock).unwrap();
    });
    hc_core::add_mock(&mock, "GET", url, b"").unwrap();
    mock
}

#[tokio::test]
async fn rate_limited_call_honors_retry_after_then_succeeds() {
    // Given an endpoint answering 429 Retry-After: 1 once, then 200
    let env = Env::new();
    let _success = always_mock("https://example/limited", 200);
    let _limited = one_shot_mock("https://example/limited", 429, Some("1"));

    let call = Call::new().unwrap();
    call.set_url("GET", "https://example/limited").unwrap();
    call.set_retry_delay(Duration::from_secs(1)).unwrap();

    // When it performs
    let started = Instant::now();
    let op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&call, &op).unwrap();
    op.wait().await.unwrap();

    // Then it retried once, waiting out the Retry-After window
    assert_eq!(call.status_code(), 200);
    assert_eq!(call.attempt_number(), 2);
    assert!(started.elapsed() >= Duration::from_millis(1000));
    env.shutdown().await;
}

#[tokio::test]
async fn transient_503_retries_until_success_with_ample_deadline() {
    let env = Env::new();
    let _success = always_mock("https://example/flaky", 200);
    let _flaky = one_shot_mock("https://example/flaky", 503, Some("0"));

    let call = Call::new().unwrap();
    call.set_url("GET", "https://example/flaky").unwrap();
    call.set_retry_delay(Duration::from_secs(1)).unwrap();
    call.set_timeout_window(Duration::from_secs(60)).unwrap();

    let op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&call, &op).unwrap();
    op.wait().await.unwrap();

    assert_eq!(call.status_code(), 200);
    assert!(call.attempt_number() >= 2);
    env.shutdown().await;
}

#[tokio::test]
async fn retry_allowed_false_stops_after_one_attempt() {
    let env = Env::new();
    let _always_busy = always_mock("https://example/busy", 503);

    let call = Call::new().unwrap();
    call.set_url("GET", "https://example/busy").unwrap();
    call.set_retry_allowed(false).unwrap();

    let op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&call, &op).unwrap();
    op.wait().await.unwrap();

    assert_eq!(call.status_code(), 503);
    assert_eq!(call.attempt_number(), 1);
    env.shutdown().await;
}

#[tokio::test]
async fn exhausted_timeout_window_surfaces_the_last_failure() {
    // Given an endpoint that only ever answers 503 and a 3 second window
    let env = Env::new();
    let _always_busy = always_mock("https://example/down", 503);

    let call = Call::new().unwrap();
    call.set_url("GET", "https://example/down").unwrap();
    call.set_timeout_window(Duration::from_secs(3)).unwrap();

    // When it performs
    let started = Instant::now();
    let op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&call, &op).unwrap();
    op.wait().await.unwrap();

    // Then no retry fits inside the window: one attempt, final status 503,
    // and completion well before the window plus a backoff
    assert_eq!(call.status_code(), 503);
    assert_eq!(call.attempt_number(), 1);
    assert!(started.elapsed() < Duration::from_secs(3));
    env.shutdown().await;
}

#[tokio::test]
async fn cached_retry_after_fails_followers_fast() {
    // Given a first call that hit a 429 with a one minute Retry-After,
    // remembered under cache id 7
    let env = Env::new();
    let mock = Mock::new().unwrap();
    mock.set_status_code(429);
    mock.set_response_header("Retry-After", "60");
    hc_core::add_mock(&mock, "GET", "https://example/throttled", b"").unwrap();

    let first = Call::new().unwrap();
    first.set_url("GET", "https://example/throttled").unwrap();
    first.set_retry_cache_id(7).unwrap();
    let first_op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&first, &first_op).unwrap();
    first_op.wait().await.unwrap();
    assert_eq!(first.status_code(), 429);
    assert_eq!(first.attempt_number(), 1);

    // When a second call starts against the same cache id inside the window
    let second = Call::new().unwrap();
    second.set_url("GET", "https://example/throttled").unwrap();
    second.set_retry_cache_id(7).unwrap();
    let started = Instant::now();
    let second_op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&second, &second_op).unwrap();
    second_op.wait().await.unwrap();

    // Then it fails fast with the cached status without issuing an attempt
    assert_eq!(second.status_code(), 429);
    assert_eq!(second.attempt_number(), 0);
    assert!(started.elapsed() < Duration::from_secs(1));
    env.shutdown().await;
}

#[tokio::test]
async fn lifo_mock_selection_prefers_the_most_recent_registration() {
    // Given two mocks matching the same endpoint
    let env = Env::new();
    let _older = always_mock("https://example/stacked", 201);
    let newer = always_mock("https://example/stacked", 202);

    let call = Call::new().unwrap();
    call.set_url("GET", "https://example/stacked").unwrap();
    let op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&call, &op).unwrap();
    op.wait().await.unwrap();
    assert_eq!(call.status_code(), 202);

    // When the newer mock is removed, the next perform sees the older one
    hc_core::remove_mock(&newer).unwrap();
    let again = Call::new().unwrap();
    again.set_url("GET", "https://example/stacked").unwrap();
    let op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&again, &op).unwrap();
    op.wait().await.unwrap();
    assert_eq!(again.status_code(), 201);
    env.shutdown().await;
}
