use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock};

use crate::config::InitArgs;
use crate::error::{HcError, HcResult};
use crate::http::CallHandle;
use crate::http::retry::RetryAfterCache;
use crate::mock::Mock;
use crate::transport::Transport;

const LIB_VERSION: &str = "2026.07.20260715.1";

/// Invoked for every completed call before its perform op completes.
pub type CallRoutedHandler = dyn Fn(&CallHandle) + Send + Sync;

/// Process-scope state created by `initialize` and destroyed by `cleanup`.
/// Every mutable field carries its own lock; nothing here assumes a global
/// lock order beyond "take one at a time".
pub(crate) struct GlobalState {
    last_id: AtomicU64,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    pub(crate) mocks: Mutex<Vec<Arc<Mock>>>,
    pub(crate) retry_after_cache: RetryAfterCache,
    routed_token: AtomicU32,
    routed_handlers: Mutex<Vec<(u32, Arc<CallRoutedHandler>)>>,
}

impl GlobalState {
    fn new() -> Self {
        GlobalState {
            last_id: AtomicU64::new(0),
            transport: RwLock::new(None),
            mocks: Mutex::new(Vec::new()),
            retry_after_cache: RetryAfterCache::new(),
            routed_token: AtomicU32::new(0),
            routed_handlers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().unwrap().clone()
    }

    fn install_transport(&self, transport: Option<Arc<dyn Transport>>) {
        *self.transport.write().unwrap() = transport;
    }

    /// Runs every registered call-routed handler. Handler panics are
    /// swallowed and traced so one misbehaving observer cannot take the
    /// engine down.
    pub(crate) fn fire_call_routed_handlers(&self, call: &CallHandle) {
        let handlers: Vec<Arc<CallRoutedHandler>> = {
            let registered = self.routed_handlers.lock().unwrap();
            registered.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(call);
            }));
            if result.is_err() {
                tracing::error!(target: "httpclient", "call routed handler panicked [ID {}]", call.id());
            }
        }
    }
}

static GLOBAL: LazyLock<RwLock<Option<Arc<GlobalState>>>> = LazyLock::new(|| RwLock::new(None));

/// Initializes the process-scope state. Fails `AlreadyInitialized` on a
/// second call without an intervening `cleanup`.
pub fn initialize(args: InitArgs) -> HcResult<()> {
    crate::trace::init_logging();

    let mut slot = GLOBAL.write().unwrap();
    if slot.is_some() {
        return Err(HcError::AlreadyInitialized);
    }

    let state = Arc::new(GlobalState::new());
    state.install_transport(args.transport.or_else(default_transport));
    *slot = Some(state);
    tracing::info!(target: "httpclient", "hc_core initialized, version {LIB_VERSION}");
    Ok(())
}

/// Tears the process-scope state down. Registered mocks are released;
/// outstanding handles stay valid but new API calls fail `NotInitialized`.
pub fn cleanup() {
    let mut slot = GLOBAL.write().unwrap();
    if let Some(state) = slot.take() {
        state.mocks.lock().unwrap().clear();
        tracing::info!(target: "httpclient", "hc_core cleaned up");
    }
}

#[cfg(feature = "reqwest-transport")]
fn default_transport() -> Option<Arc<dyn Transport>> {
    Some(Arc::new(crate::transport::ReqwestTransport::new()))
}

#[cfg(not(feature = "reqwest-transport"))]
fn default_transport() -> Option<Arc<dyn Transport>> {
    None
}

pub(crate) fn state() -> Option<Arc<GlobalState>> {
    GLOBAL.read().unwrap().clone()
}

/// Library version stamp, `"YYYY.MM.YYYYMMDD.rev"`.
pub fn lib_version() -> &'static str {
    LIB_VERSION
}

/// Replaces the installed transport; `None` restores the built-in default.
/// This is how hosts plug their native HTTP stack under the call engine.
pub fn set_transport(transport: Option<Arc<dyn Transport>>) -> HcResult<()> {
    let state = state().ok_or(HcError::NotInitialized)?;
    state.install_transport(transport.or_else(default_transport));
    Ok(())
}

pub fn transport() -> HcResult<Option<Arc<dyn Transport>>> {
    let state = state().ok_or(HcError::NotInitialized)?;
    Ok(state.transport())
}

/// Registers a handler observing every completed call; returns a removal
/// token.
pub fn add_call_routed_handler(
    handler: impl Fn(&CallHandle) + Send + Sync + 'static,
) -> HcResult<u32> {
    let state = state().ok_or(HcError::NotInitialized)?;
    let token = state.routed_token.fetch_add(1, Ordering::Relaxed) + 1;
    state
        .routed_handlers
        .lock()
        .unwrap()
        .push((token, Arc::new(handler)));
    Ok(token)
}

pub fn remove_call_routed_handler(token: u32) -> HcResult<()> {
    let state = state().ok_or(HcError::NotInitialized)?;
    state
        .routed_handlers
        .lock()
        .unwrap()
        .retain(|(registered, _)| *registered != token);
    Ok(())
}
