use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, RwLock};
use std::time::Instant;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

mod callback_layer;

pub use callback_layer::CallbackLayer;

/// Verbosity of a trace area, most severe first. `Off` silences the area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TraceLevel {
    Off = 0,
    Error = 1,
    Warning = 2,
    Important = 3,
    Information = 4,
    Verbose = 5,
}

impl TraceLevel {
    fn from_u8(raw: u8) -> TraceLevel {
        match raw {
            0 => TraceLevel::Off,
            1 => TraceLevel::Error,
            2 => TraceLevel::Warning,
            3 => TraceLevel::Important,
            4 => TraceLevel::Information,
            _ => TraceLevel::Verbose,
        }
    }

    pub(crate) fn from_tracing(level: &tracing::Level) -> TraceLevel {
        match *level {
            tracing::Level::ERROR => TraceLevel::Error,
            tracing::Level::WARN => TraceLevel::Warning,
            tracing::Level::INFO => TraceLevel::Information,
            tracing::Level::DEBUG | tracing::Level::TRACE => TraceLevel::Verbose,
        }
    }

    pub(crate) fn short_name(self) -> &'static str {
        match self {
            TraceLevel::Off => "O",
            TraceLevel::Error => "E",
            TraceLevel::Warning => "W",
            TraceLevel::Important => "P",
            TraceLevel::Information => "I",
            TraceLevel::Verbose => "V",
        }
    }
}

/// Named trace areas with independently settable verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceArea {
    HttpClient,
    WebSocket,
}

impl TraceArea {
    pub fn name(self) -> &'static str {
        match self {
            TraceArea::HttpClient => "HTTPCLIENT",
            TraceArea::WebSocket => "WEBSOCKET",
        }
    }

    pub(crate) fn from_target(target: &str) -> TraceArea {
        if target.starts_with("websocket") {
            TraceArea::WebSocket
        } else {
            TraceArea::HttpClient
        }
    }

    fn verbosity_slot(self) -> &'static AtomicU8 {
        match self {
            TraceArea::HttpClient => &HTTPCLIENT_VERBOSITY,
            TraceArea::WebSocket => &WEBSOCKET_VERBOSITY,
        }
    }

    pub fn verbosity(self) -> TraceLevel {
        TraceLevel::from_u8(self.verbosity_slot().load(Ordering::Relaxed))
    }
}

static HTTPCLIENT_VERBOSITY: AtomicU8 = AtomicU8::new(TraceLevel::Information as u8);
static WEBSOCKET_VERBOSITY: AtomicU8 = AtomicU8::new(TraceLevel::Information as u8);
static TRACE_TO_DEBUGGER: AtomicBool = AtomicBool::new(false);

/// Client-registered trace sink. Receives `(area, level, thread id,
/// milliseconds since trace start, message)`.
pub type TraceCallback = dyn Fn(&str, TraceLevel, u64, u64, &str) + Send + Sync;

static CLIENT_CALLBACK: RwLock<Option<Arc<TraceCallback>>> = RwLock::new(None);

static TRACE_EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Sets the verbosity for every area at once.
pub fn settings_set_trace_level(level: TraceLevel) {
    HTTPCLIENT_VERBOSITY.store(level as u8, Ordering::Relaxed);
    WEBSOCKET_VERBOSITY.store(level as u8, Ordering::Relaxed);
}

pub fn set_area_verbosity(area: TraceArea, level: TraceLevel) {
    area.verbosity_slot().store(level as u8, Ordering::Relaxed);
}

/// Registers (or clears) the client trace callback. Registration takes the
/// slot's write lock; emission only ever takes the read side.
pub fn set_client_callback(callback: Option<Arc<TraceCallback>>) {
    *CLIENT_CALLBACK.write().unwrap() = callback;
}

pub fn set_trace_to_debugger(enabled: bool) {
    TRACE_TO_DEBUGGER.store(enabled, Ordering::Relaxed);
}

pub(crate) fn trace_to_debugger() -> bool {
    TRACE_TO_DEBUGGER.load(Ordering::Relaxed)
}

pub(crate) fn client_callback() -> Option<Arc<TraceCallback>> {
    CLIENT_CALLBACK.read().unwrap().clone()
}

pub(crate) fn timestamp_ms() -> u64 {
    TRACE_EPOCH.elapsed().as_millis() as u64
}

/// Installs the global subscriber: an env-filtered fmt layer plus the
/// callback layer feeding the debugger and client sinks. Safe to call
/// repeatedly; only the first installation wins (tests re-initialize
/// freely).
pub fn init_logging() {
    let subscriber = Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_default_env()),
        )
        .with(CallbackLayer::new());

    let _ = tracing::subscriber::set_global_default(subscriber);
    LazyLock::force(&TRACE_EPOCH);
}
