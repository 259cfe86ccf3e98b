use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{E_FAIL, HResult, HcError, HcResult, S_OK};
use crate::headers::HeaderMap;
use crate::http::{Call, CallHandle, engine};
use crate::task::AsyncOp;

mod receive;

pub use receive::WsReadKind;

use receive::ReceiveState;

/// Receive buffer starting size; it doubles on fill up to the configured
/// maximum.
pub(crate) const RECEIVE_BUFFER_INITIAL_SIZE: usize = 4 * 1024;
const DEFAULT_MAX_RECEIVE_BUFFER_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketState {
    Initialized,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Close codes from the WebSocket registry plus the provider-specific
/// values the original surface carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WebSocketCloseStatus {
    Normal = 1000,
    GoingAway = 1001,
    ProtocolError = 1002,
    Unsupported = 1003,
    EmptyStatus = 1005,
    AbnormalClose = 1006,
    InconsistentDatatype = 1007,
    PolicyViolation = 1008,
    TooLarge = 1009,
    NegotiateError = 1010,
    ServerTerminate = 1011,
    HandshakeError = 1015,
    UnknownError = 4000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsMessageKind {
    Utf8,
    Binary,
}

/// Result payload of connect and send operations.
#[derive(Clone)]
pub struct WebSocketResult {
    pub websocket: Arc<WebSocket>,
    pub error_code: HResult,
    pub platform_error_code: i32,
}

pub type MessageHandler = dyn Fn(&Arc<WebSocket>, &str) + Send + Sync;
pub type BinaryMessageHandler = dyn Fn(&Arc<WebSocket>, &[u8]) + Send + Sync;
/// `(websocket, bytes, end_of_message)`.
pub type BinaryFragmentHandler = dyn Fn(&Arc<WebSocket>, &[u8], bool) + Send + Sync;
pub type CloseHandler = dyn Fn(&Arc<WebSocket>, WebSocketCloseStatus) + Send + Sync;

/// Event handlers supplied at creation. The fragment handler is optional
/// and installable later; without one, oversized receives fall back to the
/// binary message handler.
#[derive(Default)]
pub struct WebSocketHandlers {
    pub on_message: Option<Arc<MessageHandler>>,
    pub on_binary_message: Option<Arc<BinaryMessageHandler>>,
    pub on_close: Option<Arc<CloseHandler>>,
}

struct PendingSend {
    payload: Vec<u8>,
    kind: WsMessageKind,
    op: AsyncOp<WebSocketResult>,
}

/// A WebSocket connection handle. Cloning duplicates the handle; the
/// transport owns the wire, this type owns lifetime, send serialization,
/// and receive-side reassembly.
pub struct WebSocket {
    id: u64,
    uri: Mutex<String>,
    sub_protocol: Mutex<String>,
    headers: Mutex<HeaderMap>,
    proxy_uri: Mutex<String>,
    max_receive_buffer_size: AtomicUsize,
    message_handler: Mutex<Option<Arc<MessageHandler>>>,
    binary_message_handler: Mutex<Option<Arc<BinaryMessageHandler>>>,
    binary_fragment_handler: Mutex<Option<Arc<BinaryFragmentHandler>>>,
    close_handler: Mutex<Option<Arc<CloseHandler>>>,
    state: Mutex<WebSocketState>,
    connect_called: AtomicBool,
    upgrade_call: Mutex<Option<CallHandle>>,
    send_queue: Mutex<VecDeque<PendingSend>>,
    sends_in_flight: AtomicUsize,
    receive: Mutex<ReceiveState>,
}

impl WebSocket {
    pub fn new(handlers: WebSocketHandlers) -> HcResult<Arc<WebSocket>> {
        let global = crate::global::state().ok_or(HcError::NotInitialized)?;
        let id = global.next_id();
        tracing::info!(target: "websocket", "WebSocketCreate [ID {id}]");
        Ok(Arc::new(WebSocket {
            id,
            uri: Mutex::new(String::new()),
            sub_protocol: Mutex::new(String::new()),
            headers: Mutex::new(HeaderMap::new()),
            proxy_uri: Mutex::new(String::new()),
            max_receive_buffer_size: AtomicUsize::new(DEFAULT_MAX_RECEIVE_BUFFER_SIZE),
            message_handler: Mutex::new(handlers.on_message),
            binary_message_handler: Mutex::new(handlers.on_binary_message),
            binary_fragment_handler: Mutex::new(None),
            close_handler: Mutex::new(handlers.on_close),
            state: Mutex::new(WebSocketState::Initialized),
            connect_called: AtomicBool::new(false),
            upgrade_call: Mutex::new(None),
            send_queue: Mutex::new(VecDeque::new()),
            sends_in_flight: AtomicUsize::new(0),
            receive: Mutex::new(ReceiveState::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_not_connected(&self) -> HcResult<()> {
        if self.connect_called.load(Ordering::SeqCst) {
            return Err(HcError::ConnectAlreadyCalled);
        }
        Ok(())
    }

    pub fn set_header(&self, name: &str, value: &str) -> HcResult<()> {
        self.ensure_not_connected()?;
        if name.is_empty() {
            return Err(HcError::InvalidArg);
        }
        self.headers.lock().unwrap().set(name, value);
        tracing::info!(target: "websocket", "WebSocketSetHeader [ID {}]: {name}={value}", self.id);
        Ok(())
    }

    pub fn set_proxy_uri(&self, proxy_uri: &str) -> HcResult<()> {
        self.ensure_not_connected()?;
        *self.proxy_uri.lock().unwrap() = proxy_uri.to_owned();
        Ok(())
    }

    pub fn set_max_receive_buffer_size(&self, max_size: usize) -> HcResult<()> {
        if max_size == 0 {
            return Err(HcError::InvalidArg);
        }
        self.max_receive_buffer_size
            .store(max_size, Ordering::SeqCst);
        Ok(())
    }

    pub fn set_binary_fragment_handler(
        &self,
        handler: impl Fn(&Arc<WebSocket>, &[u8], bool) + Send + Sync + 'static,
    ) {
        *self.binary_fragment_handler.lock().unwrap() = Some(Arc::new(handler));
    }

    pub fn uri(&self) -> String {
        self.uri.lock().unwrap().clone()
    }

    pub fn sub_protocol(&self) -> String {
        self.sub_protocol.lock().unwrap().clone()
    }

    pub fn headers(&self) -> HeaderMap {
        self.headers.lock().unwrap().clone()
    }

    pub fn proxy_uri(&self) -> String {
        self.proxy_uri.lock().unwrap().clone()
    }

    pub fn max_receive_buffer_size(&self) -> usize {
        self.max_receive_buffer_size.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WebSocketState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: WebSocketState) {
        *self.state.lock().unwrap() = state;
    }

    /// The internal HTTP call driving (or having driven) the upgrade
    /// handshake.
    pub fn upgrade_call(&self) -> Option<CallHandle> {
        self.upgrade_call.lock().unwrap().clone()
    }

    fn result(self: &Arc<Self>, error_code: HResult, platform_error_code: i32) -> WebSocketResult {
        WebSocketResult {
            websocket: self.clone(),
            error_code,
            platform_error_code,
        }
    }
}

/// Opens the connection: a GET upgrade exchange run through the call engine
/// with retries disabled. The op completes with the websocket and an error
/// code; any upgrade response other than 101 is a connection failure.
pub fn connect_async(
    uri: &str,
    sub_protocol: &str,
    websocket: &Arc<WebSocket>,
    op: &AsyncOp<WebSocketResult>,
) -> HcResult<()> {
    crate::global::state().ok_or(HcError::NotInitialized)?;
    url::Url::parse(uri).map_err(|_| HcError::InvalidArg)?;
    if websocket.connect_called.swap(true, Ordering::SeqCst) {
        return Err(HcError::ConnectAlreadyCalled);
    }

    *websocket.uri.lock().unwrap() = uri.to_owned();
    *websocket.sub_protocol.lock().unwrap() = sub_protocol.to_owned();
    websocket.set_state(WebSocketState::Connecting);
    tracing::info!(target: "websocket", "WebSocketConnectAsync [ID {}] {uri}", websocket.id);

    let call = match upgrade_call_for(uri, sub_protocol, websocket) {
        Ok(call) => call,
        Err(e) => {
            websocket.set_state(WebSocketState::Closed);
            return Err(e);
        }
    };
    *websocket.upgrade_call.lock().unwrap() = Some(call.clone());

    let ws = websocket.clone();
    let outer = op.clone();
    let handshake_call = call.clone();
    let inner = AsyncOp::new_internal(op.queue(), move |inner_op: &AsyncOp<()>| {
        let result = inner_op
            .result()
            .unwrap_or_else(|| Err(HcError::internal("upgrade completed without a result")));
        match result {
            Ok(()) => {
                let status = handshake_call.status_code();
                let network_error = handshake_call.network_error_code();
                if status == 101 {
                    ws.set_state(WebSocketState::Connected);
                    tracing::info!(target: "websocket", "WebSocket connected [ID {}]", ws.id);
                    outer.complete(Ok(ws.result(S_OK, 0)));
                } else {
                    ws.set_state(WebSocketState::Closed);
                    let error_code = if network_error != S_OK {
                        network_error
                    } else {
                        E_FAIL
                    };
                    tracing::warn!(target: "websocket", "WebSocket upgrade failed [ID {}] status {status}", ws.id);
                    outer.complete(Ok(ws.result(
                        error_code,
                        handshake_call.platform_network_error_code(),
                    )));
                }
            }
            Err(e) => {
                ws.set_state(WebSocketState::Closed);
                outer.complete(Err(e));
            }
        }
    });

    engine::perform_async(&call, &inner).inspect_err(|_| {
        websocket.set_state(WebSocketState::Closed);
    })
}

fn upgrade_call_for(
    uri: &str,
    sub_protocol: &str,
    websocket: &Arc<WebSocket>,
) -> HcResult<CallHandle> {
    let call = Call::new()?;
    call.set_url("GET", uri)?;
    call.set_retry_allowed(false)?;
    for (name, value) in websocket.headers().iter() {
        call.set_header(name, value)?;
    }
    if !sub_protocol.is_empty() {
        call.set_header("Sec-WebSocket-Protocol", sub_protocol)?;
    }
    call.set_websocket(websocket.clone());
    Ok(call)
}

/// Sends a UTF-8 text message. Sends on one connection are serialized: a
/// queued send is not handed to the transport until the previous send's op
/// has been completed.
pub fn send_message_async(
    websocket: &Arc<WebSocket>,
    message: &str,
    op: &AsyncOp<WebSocketResult>,
) -> HcResult<()> {
    enqueue_send(websocket, message.as_bytes().to_vec(), WsMessageKind::Utf8, op)
}

pub fn send_binary_message_async(
    websocket: &Arc<WebSocket>,
    payload: &[u8],
    op: &AsyncOp<WebSocketResult>,
) -> HcResult<()> {
    enqueue_send(websocket, payload.to_vec(), WsMessageKind::Binary, op)
}

fn enqueue_send(
    websocket: &Arc<WebSocket>,
    payload: Vec<u8>,
    kind: WsMessageKind,
    op: &AsyncOp<WebSocketResult>,
) -> HcResult<()> {
    if payload.is_empty() {
        return Err(HcError::InvalidArg);
    }
    if websocket.state() != WebSocketState::Connected {
        return Err(HcError::InvalidArg);
    }

    websocket.send_queue.lock().unwrap().push_back(PendingSend {
        payload,
        kind,
        op: op.clone(),
    });

    // First send in the window starts the pump; completions chain the rest.
    if websocket.sends_in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
        issue_next_send(websocket);
    }
    Ok(())
}

fn issue_next_send(websocket: &Arc<WebSocket>) {
    let Some(send) = websocket.send_queue.lock().unwrap().pop_front() else {
        return;
    };

    let transport = match crate::global::transport() {
        Ok(Some(transport)) => transport,
        Ok(None) => {
            send.op.complete(Err(HcError::NetworkNotInitialized));
            finish_send(websocket);
            return;
        }
        Err(e) => {
            send.op.complete(Err(e));
            finish_send(websocket);
            return;
        }
    };

    let ws = websocket.clone();
    let client_op = send.op.clone();
    let inner = AsyncOp::new_internal(
        send.op.queue(),
        move |inner_op: &AsyncOp<WebSocketResult>| {
            let result = inner_op
                .result()
                .unwrap_or_else(|| Err(HcError::internal("send completed without a result")));
            client_op.complete(result);
            finish_send(&ws);
        },
    );

    tracing::debug!(target: "websocket", "WebSocket send [ID {}] {} bytes", websocket.id, send.payload.len());
    transport.websocket_send_async(websocket.clone(), send.payload, send.kind, inner);
}

fn finish_send(websocket: &Arc<WebSocket>) {
    if websocket.sends_in_flight.fetch_sub(1, Ordering::SeqCst) > 1 {
        issue_next_send(websocket);
    }
}

/// Starts the close handshake toward the peer. Completion of the close is
/// reported through the receive path (peer close frame) and the close
/// handler.
pub fn disconnect(websocket: &Arc<WebSocket>, close_status: WebSocketCloseStatus) -> HcResult<()> {
    match websocket.state() {
        WebSocketState::Connected => {}
        WebSocketState::Closing | WebSocketState::Closed => return Ok(()),
        _ => return Err(HcError::InvalidArg),
    }

    websocket.set_state(WebSocketState::Closing);
    tracing::info!(target: "websocket", "WebSocketDisconnect [ID {}] status {:?}", websocket.id, close_status);

    let transport = crate::global::transport()?.ok_or(HcError::NetworkNotInitialized)?;
    transport.websocket_disconnect(websocket.clone(), close_status)
}
