use std::cell::Cell;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::field::Field;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use super::{TraceArea, TraceLevel};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

fn current_thread_id() -> u64 {
    THREAD_ID.with(|slot| {
        let mut id = slot.get();
        if id == 0 {
            id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            slot.set(id);
        }
        id
    })
}

/// Fans trace events out to the debugger sink and the client-registered
/// callback. Filtering is per-area verbosity read from atomics, so the
/// disabled path never takes a lock.
pub struct CallbackLayer;

impl CallbackLayer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CallbackLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CallbackLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let area = TraceArea::from_target(event.metadata().target());
        let level = TraceLevel::from_tracing(event.metadata().level());
        // Per-area verbosity gate. This lives here rather than in
        // `enabled` so it cannot suppress events for sibling layers.
        if level > area.verbosity() {
            return;
        }

        let mut message = String::new();
        event.record(&mut |field: &Field, value: &dyn Debug| {
            if field.name() == "message" {
                message.push_str(&format!("{value:?}"));
            } else {
                let name = field.name();
                message.push_str(&format!(" {name}={value:?}"));
            }
        });

        let thread_id = current_thread_id();
        let timestamp = super::timestamp_ms();

        if super::trace_to_debugger() {
            let seconds = timestamp / 1000;
            // [threadId][level][time][area] message
            eprintln!(
                "[{:04X}][{}][{:02}:{:02}:{:02}.{:03}][{}] {}",
                thread_id,
                level.short_name(),
                seconds / 3600,
                (seconds / 60) % 60,
                seconds % 60,
                timestamp % 1000,
                area.name(),
                message
            );
        }

        if let Some(callback) = super::client_callback() {
            callback(area.name(), level, thread_id, timestamp, &message);
        }
    }
}
