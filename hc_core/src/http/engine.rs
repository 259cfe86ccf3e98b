use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::CompressionLevel;
use crate::error::{HcError, HcResult};
use crate::global::GlobalState;
use crate::http::retry::{self, RetryAfterState, RetryInput};
use crate::http::CallHandle;
use crate::task::{AsyncOp, CompositeQueue};

/// Per-perform state. Holds a strong call reference for the lifetime of the
/// operation and the two subqueues stages run on: `work_queue` for engine
/// stages (terminated on cancel) and `provider_queue` for transport
/// dispatch (attempts already handed to the transport run to completion).
struct PerformContext {
    call: CallHandle,
    op: AsyncOp<()>,
    work_queue: CompositeQueue,
    provider_queue: CompositeQueue,
    /// Whether this call is the one holding the retry-after cache's
    /// pending gate; cleared on any completion path.
    marked_pending: AtomicBool,
}

/// Initiates one logical HTTP call on the op's task queue.
///
/// The op completes exactly once: `Ok` with the response populated on the
/// call (transport-level failures land in `network_error_code`, not here),
/// `Aborted` when canceled before a result was available, or an engine
/// failure code.
pub fn perform_async(call: &CallHandle, op: &AsyncOp<()>) -> HcResult<()> {
    crate::global::state().ok_or(HcError::NotInitialized)?;

    if !call.try_latch_perform() {
        return Err(HcError::PerformAlreadyCalled);
    }
    call.set_perform_start(Instant::now());

    if call.trace_call() {
        tracing::info!(target: "httpclient", "PerformAsync [ID {}] {} {}", call.id(), call.method(), call.url());
    }

    // A custom response writer cannot feed the decompression stage; fall
    // back to the default buffer writer when a compressed response is
    // expected.
    if call.compressed_response_expected() && call.has_custom_response_writer() {
        tracing::warn!(target: "httpclient", "PerformAsync [ID {}] compressed response expected, replacing custom response writer with default", call.id());
        call.clear_response_writer();
    }

    let queue = op.queue().clone();
    let ctx = Arc::new(PerformContext {
        call: call.clone(),
        op: op.clone(),
        work_queue: queue.create_composite(),
        provider_queue: queue.create_composite(),
        marked_pending: AtomicBool::new(false),
    });

    let work_queue = ctx.work_queue.clone();
    op.set_cancel_hook(move || work_queue.terminate());

    let stage = ctx.clone();
    ctx.work_queue.submit(move |canceled| pre_check(stage, canceled));
    Ok(())
}

enum PreCheckOutcome {
    Proceed(Duration),
    FailFast(u32),
}

fn pre_check(ctx: Arc<PerformContext>, canceled: bool) {
    if canceled {
        return abort(&ctx);
    }
    let Some(state) = crate::global::state() else {
        return ctx.op.complete(Err(HcError::NotInitialized));
    };

    let delay = match consult_retry_after_cache(&state, &ctx) {
        PreCheckOutcome::Proceed(delay) => delay,
        PreCheckOutcome::FailFast(status_code) => {
            if ctx.call.trace_call() {
                tracing::info!(target: "httpclient", "PerformAsync [ID {}] fail fast {status_code}", ctx.call.id());
            }
            ctx.call.set_status_code(status_code);
            return complete_perform(&ctx, Ok(()));
        }
    };

    let stage = ctx.clone();
    if ctx.call.compression_level() != CompressionLevel::None && crate::compression::available() {
        ctx.work_queue
            .submit_delayed(delay, move |canceled| compress_body(stage, canceled));
    } else {
        ctx.work_queue
            .submit_delayed(delay, move |canceled| submit_attempt(stage, canceled));
    }
}

/// Fail-fast policy over the retry-after cache: a healthy or expired entry
/// lets the call through immediately; a live cool-down either delays this
/// call to the window's edge (first waiter, window within deadline) or
/// fails it fast with the cached status.
fn consult_retry_after_cache(state: &GlobalState, ctx: &Arc<PerformContext>) -> PreCheckOutcome {
    let settings = ctx.call.retry_settings();
    if settings.retry_after_cache_id == 0 {
        return PreCheckOutcome::Proceed(Duration::ZERO);
    }

    let cache_id = settings.retry_after_cache_id;
    let now = Instant::now();
    let deadline = ctx.call.perform_start().unwrap_or(now) + settings.timeout_window;

    // The whole decision is one read-modify-write under the cache lock so
    // two concurrent first-waiters cannot both claim the pending gate.
    state.retry_after_cache.update(|entries| {
        let Some(entry) = entries.get(&cache_id).copied() else {
            return PreCheckOutcome::Proceed(Duration::ZERO);
        };
        if entry.status_code < 400 {
            return PreCheckOutcome::Proceed(Duration::ZERO);
        }

        if now >= entry.retry_after_time {
            // Outside the window; forget the failure and go.
            entries.remove(&cache_id);
            return PreCheckOutcome::Proceed(Duration::ZERO);
        }

        let remaining = entry.retry_after_time - now;
        if !entry.call_pending && entry.retry_after_time < deadline {
            // First waiter, and the window opens before this call's
            // deadline: wait it out instead of failing. Followers fail
            // fast below so the window opening does not release a flood.
            entries.insert(
                cache_id,
                RetryAfterState {
                    call_pending: true,
                    ..entry
                },
            );
            ctx.marked_pending.store(true, Ordering::SeqCst);
            return PreCheckOutcome::Proceed(remaining);
        }

        PreCheckOutcome::FailFast(entry.status_code)
    })
}

fn compress_body(ctx: Arc<PerformContext>, canceled: bool) {
    if canceled {
        return abort(&ctx);
    }
    if ctx.call.trace_call() {
        tracing::info!(target: "httpclient", "CompressRequestBody [ID {}]", ctx.call.id());
    }

    let body = match ctx.call.read_entire_request_body() {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(target: "httpclient", "CompressRequestBody [ID {}] request body read failed: {e}", ctx.call.id());
            return ctx.op.complete(Err(e));
        }
    };

    let compressed = match crate::compression::compress_data(&body, ctx.call.compression_level()) {
        Ok(compressed) => compressed,
        Err(e) => {
            tracing::error!(target: "httpclient", "CompressRequestBody [ID {}] failed: {e}", ctx.call.id());
            return ctx
                .op
                .complete(Err(HcError::internal("request body compression failed")));
        }
    };
    ctx.call.replace_request_body_with_compressed(compressed);

    let stage = ctx.clone();
    ctx.work_queue
        .submit(move |canceled| submit_attempt(stage, canceled));
}

fn submit_attempt(ctx: Arc<PerformContext>, canceled: bool) {
    if canceled {
        return abort(&ctx);
    }

    let attempt = ctx.call.next_attempt();
    ctx.call.reset_response_properties();
    if ctx.call.trace_call() {
        tracing::info!(target: "httpclient", "PerformSingleRequest [ID {}] attempt {attempt}", ctx.call.id());
    }

    if crate::mock::intercept(&ctx.call) {
        return classify_outcome(ctx, Ok(()));
    }

    let transport = match crate::global::transport() {
        Ok(Some(transport)) => transport,
        Ok(None) => return ctx.op.complete(Err(HcError::NetworkNotInitialized)),
        Err(e) => return ctx.op.complete(Err(e)),
    };

    let inner_ctx = ctx.clone();
    let inner = AsyncOp::new_internal(ctx.op.queue(), move |op: &AsyncOp<()>| {
        let result = op
            .result()
            .unwrap_or_else(|| Err(HcError::internal("attempt completed without a result")));
        classify_outcome(inner_ctx, result);
    });

    let call = ctx.call.clone();
    ctx.provider_queue.submit(move |_| {
        transport.perform_async(call, inner);
    });
}

fn classify_outcome(ctx: Arc<PerformContext>, attempt_result: Result<(), HcError>) {
    // A canceled op terminates the work queue; an attempt that was already
    // in flight lands here and is dropped.
    if ctx.work_queue.is_terminated() {
        return abort(&ctx);
    }

    if let Err(e) = attempt_result {
        return complete_perform(&ctx, Err(e));
    }

    let settings = ctx.call.retry_settings();
    let response_received_time = Instant::now();
    let headers = ctx.call.response_headers();
    let input = RetryInput {
        status_code: ctx.call.status_code(),
        network_error_code: ctx.call.network_error_code(),
        response_headers: &headers,
        attempt_number: ctx.call.attempt_number(),
        response_received_time,
        perform_start_time: ctx.call.perform_start().unwrap_or(response_received_time),
        settings: &settings,
        jitter_scaler: retry::clock_jitter_scaler(),
    };
    let decision = retry::evaluate(&input);

    if let Some(state) = crate::global::state() {
        retry::remember_retry_after(&state.retry_after_cache, &input, &decision);
        if decision.retry && settings.retry_after_cache_id != 0 {
            ctx.marked_pending.store(true, Ordering::SeqCst);
        }
    }

    if decision.retry {
        if ctx.call.trace_call() {
            tracing::info!(target: "httpclient", "PerformSingleRequest [ID {}] retry after {} ms", ctx.call.id(), decision.delay.as_millis());
        }
        let stage = ctx.clone();
        ctx.work_queue
            .submit_delayed(decision.delay, move |canceled| submit_attempt(stage, canceled));
        return;
    }

    if ctx.call.compressed_response_expected() && crate::compression::available() {
        let body = ctx.call.response_body_bytes();
        match crate::compression::decompress_data(&body) {
            Ok(decompressed) => ctx.call.set_response_body_bytes(&decompressed),
            Err(e) => {
                tracing::error!(target: "httpclient", "PerformAsync [ID {}] response decompression failed: {e}", ctx.call.id());
                return complete_perform(
                    &ctx,
                    Err(HcError::internal("response body decompression failed")),
                );
            }
        }
    }

    complete_perform(&ctx, Ok(()));
}

fn release_pending_gate(ctx: &PerformContext) {
    if !ctx.marked_pending.swap(false, Ordering::SeqCst) {
        return;
    }
    if let Some(state) = crate::global::state() {
        state
            .retry_after_cache
            .clear_pending(ctx.call.retry_settings().retry_after_cache_id);
    }
}

fn complete_perform(ctx: &Arc<PerformContext>, result: Result<(), HcError>) {
    release_pending_gate(ctx);
    if let Some(state) = crate::global::state() {
        state.fire_call_routed_handlers(&ctx.call);
    }
    if ctx.call.trace_call() {
        tracing::info!(target: "httpclient", "PerformAsync complete [ID {}] status {} attempts {}", ctx.call.id(), ctx.call.status_code(), ctx.call.attempt_number());
    }
    ctx.op.complete(result);
}

fn abort(ctx: &Arc<PerformContext>) {
    release_pending_gate(ctx);
    if ctx.call.trace_call() {
        tracing::info!(target: "httpclient", "PerformAsync aborted [ID {}]", ctx.call.id());
    }
    ctx.op.complete(Err(HcError::Aborted));
}
