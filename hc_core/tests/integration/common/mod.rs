use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use hc_core::error::S_OK;
use hc_core::task::AsyncOp;
use hc_core::transport::Transport;
use hc_core::websocket::{WebSocket, WebSocketCloseStatus, WebSocketResult, WsMessageKind, WsReadKind};
use hc_core::{CallHandle, HcError, InitArgs, TaskQueue};

// The library state is process-wide; serialize every integration test that
// touches it.
static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Per-test environment: the global state initialized with a clean mock
/// registry and default transport, plus a task queue with an optional
/// background pump.
pub struct Env {
    _guard: MutexGuard<'static, ()>,
    pub queue: TaskQueue,
    pump: Option<tokio::task::JoinHandle<()>>,
}

impl Env {
    pub fn new() -> Env {
        let mut env = Env::new_manual();
        env.start_pump();
        env
    }

    /// Environment without a running pump, for tests that need to act
    /// before any scheduled job runs.
    pub fn new_manual() -> Env {
        let guard = TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match hc_core::initialize(InitArgs::default()) {
            Ok(()) | Err(HcError::AlreadyInitialized) => {}
            Err(e) => panic!("initialize failed: {e}"),
        }
        hc_core::clear_mocks().expect("clearing mocks");
        hc_core::set_transport(None).expect("restoring default transport");
        Env {
            _guard: guard,
            queue: TaskQueue::new(),
            pump: None,
        }
    }

    pub fn start_pump(&mut self) {
        let queue = self.queue.clone();
        self.pump = Some(tokio::spawn(async move { queue.pump().await }));
    }

    pub async fn shutdown(mut self) {
        self.queue.terminate();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

/// Transport driven by a closure receiving `(attempt number, call)`; the
/// closure populates the call's response and the op completes `Ok`.
pub struct FnTransport<F> {
    performs: AtomicUsize,
    respond: F,
}

impl<F> FnTransport<F>
where
    F: Fn(usize, &CallHandle) + Send + Sync + 'static,
{
    pub fn install(respond: F) -> Arc<FnTransport<F>> {
        let transport = Arc::new(FnTransport {
            performs: AtomicUsize::new(0),
            respond,
        });
        hc_core::set_transport(Some(transport.clone() as Arc<dyn Transport>))
            .expect("installing test transport");
        transport
    }

    pub fn performs(&self) -> usize {
        self.performs.load(Ordering::SeqCst)
    }
}

impl<F> Transport for FnTransport<F>
where
    F: Fn(usize, &CallHandle) + Send + Sync,
{
    fn perform_async(&self, call: CallHandle, op: AsyncOp<()>) {
        let attempt = self.performs.fetch_add(1, Ordering::SeqCst) + 1;
        (self.respond)(attempt, &call);
        op.complete(Ok(()));
    }
}

/// WebSocket test transport that holds each send until the test releases
/// it, so in-flight serialization is observable.
#[derive(Default)]
pub struct HoldingWsTransport {
    pending: Mutex<Vec<(Vec<u8>, WsMessageKind, Arc<WebSocket>, AsyncOp<WebSocketResult>)>>,
    pub disconnects: Mutex<Vec<WebSocketCloseStatus>>,
}

impl HoldingWsTransport {
    pub fn install() -> Arc<HoldingWsTransport> {
        let transport = Arc::new(HoldingWsTransport::default());
        hc_core::set_transport(Some(transport.clone() as Arc<dyn Transport>))
            .expect("installing ws transport");
        transport
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn pending_payloads(&self) -> Vec<Vec<u8>> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|(payload, _, _, _)| payload.clone())
            .collect()
    }

    /// Completes the oldest held send successfully.
    pub fn complete_next(&self) {
        let (_, _, websocket, op) = self.pending.lock().unwrap().remove(0);
        op.complete(Ok(WebSocketResult {
            websocket,
            error_code: S_OK,
            platform_error_code: 0,
        }));
    }
}

impl Transport for HoldingWsTransport {
    fn perform_async(&self, _call: CallHandle, op: AsyncOp<()>) {
        op.complete(Err(HcError::NotSupported));
    }

    fn websocket_send_async(
        &self,
        websocket: Arc<WebSocket>,
        payload: Vec<u8>,
        kind: WsMessageKind,
        op: AsyncOp<WebSocketResult>,
    ) {
        self.pending
            .lock()
            .unwrap()
            .push((payload, kind, websocket, op));
    }

    fn websocket_disconnect(
        &self,
        websocket: Arc<WebSocket>,
        close_status: WebSocketCloseStatus,
    ) -> Result<(), HcError> {
        self.disconnects.lock().unwrap().push(close_status);
        // Emulate the peer acknowledging with its close frame.
        websocket.deliver_read(b"", WsReadKind::CloseFrame(close_status));
        Ok(())
    }
}
