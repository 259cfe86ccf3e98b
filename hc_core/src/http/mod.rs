use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{CompressionLevel, RetrySettings};
use crate::error::{HResult, HcError, HcResult, S_OK};
use crate::headers::HeaderMap;
use crate::websocket::WebSocket;

pub mod engine;
pub mod retry;

/// Shared-ownership call handle. Cloning duplicates the handle; dropping
/// the last clone disposes the call.
pub type CallHandle = Arc<Call>;

/// Streams request body bytes into the transport's buffer starting at
/// `offset`; returns how many bytes were written.
pub type RequestBodyReadFn = dyn Fn(&Call, usize, &mut [u8]) -> HcResult<usize> + Send + Sync;

/// Receives response body bytes as the transport produces them.
pub type ResponseBodyWriteFn = dyn Fn(&Call, &[u8]) -> HcResult<()> + Send + Sync;

#[derive(Clone)]
struct BodyReader {
    read: Arc<RequestBodyReadFn>,
    size: usize,
}

struct RequestState {
    method: String,
    url: String,
    headers: HeaderMap,
    /// Backing store served by the default reader when no custom reader is
    /// installed.
    body_bytes: Vec<u8>,
    body_reader: Option<BodyReader>,
    settings: RetrySettings,
    compression_level: CompressionLevel,
    compressed_response_expected: bool,
    ssl_validation: bool,
    trace_call: bool,
}

struct ResponseState {
    status_code: u32,
    network_error_code: HResult,
    platform_network_error_code: i32,
    platform_network_error_message: String,
    headers: HeaderMap,
    body: Vec<u8>,
    body_writer: Option<Arc<ResponseBodyWriteFn>>,
}

/// One logical HTTP call: request description, per-call policy, response
/// state, and the engine bookkeeping for the perform in flight.
pub struct Call {
    id: u64,
    request: Mutex<RequestState>,
    response: Mutex<ResponseState>,
    perform_called: AtomicBool,
    perform_start: Mutex<Option<Instant>>,
    attempt_number: AtomicU32,
    websocket: Mutex<Option<Arc<WebSocket>>>,
    context: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Call {
    pub fn new() -> HcResult<CallHandle> {
        let global = crate::global::state().ok_or(HcError::NotInitialized)?;
        let id = global.next_id();
        tracing::info!(target: "httpclient", "HttpCallCreate [ID {id}]");
        Ok(Arc::new(Call {
            id,
            request: Mutex::new(RequestState {
                method: "GET".to_owned(),
                url: String::new(),
                headers: HeaderMap::new(),
                body_bytes: Vec::new(),
                body_reader: None,
                settings: RetrySettings::default(),
                compression_level: CompressionLevel::None,
                compressed_response_expected: false,
                ssl_validation: true,
                trace_call: true,
            }),
            response: Mutex::new(ResponseState {
                status_code: 0,
                network_error_code: S_OK,
                platform_network_error_code: 0,
                platform_network_error_message: String::new(),
                headers: HeaderMap::new(),
                body: Vec::new(),
                body_writer: None,
            }),
            perform_called: AtomicBool::new(false),
            perform_start: Mutex::new(None),
            attempt_number: AtomicU32::new(0),
            websocket: Mutex::new(None),
            context: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_mutable(&self) -> HcResult<()> {
        if self.perform_called.load(Ordering::SeqCst) {
            return Err(HcError::PerformAlreadyCalled);
        }
        Ok(())
    }

    // --- request ---

    pub fn set_url(&self, method: &str, url: &str) -> HcResult<()> {
        self.ensure_mutable()?;
        if method.is_empty() {
            return Err(HcError::InvalidArg);
        }
        url::Url::parse(url).map_err(|_| HcError::InvalidArg)?;
        let mut request = self.request.lock().unwrap();
        request.method = method.to_owned();
        request.url = url.to_owned();
        Ok(())
    }

    pub fn method(&self) -> String {
        self.request.lock().unwrap().method.clone()
    }

    pub fn url(&self) -> String {
        self.request.lock().unwrap().url.clone()
    }

    pub fn set_request_body_bytes(&self, body: &[u8]) -> HcResult<()> {
        self.ensure_mutable()?;
        let mut request = self.request.lock().unwrap();
        request.body_bytes = body.to_vec();
        request.body_reader = None;
        Ok(())
    }

    pub fn set_request_body_string(&self, body: &str) -> HcResult<()> {
        self.set_request_body_bytes(body.as_bytes())
    }

    /// Installs a streaming request body reader; `size` is the total body
    /// size the reader will serve.
    pub fn set_request_body_reader(
        &self,
        read: impl Fn(&Call, usize, &mut [u8]) -> HcResult<usize> + Send + Sync + 'static,
        size: usize,
    ) -> HcResult<()> {
        self.ensure_mutable()?;
        let mut request = self.request.lock().unwrap();
        request.body_reader = Some(BodyReader {
            read: Arc::new(read),
            size,
        });
        request.body_bytes.clear();
        Ok(())
    }

    pub fn request_body_bytes(&self) -> Vec<u8> {
        self.request.lock().unwrap().body_bytes.clone()
    }

    pub fn request_body_size(&self) -> usize {
        let request = self.request.lock().unwrap();
        match &request.body_reader {
            Some(reader) => reader.size,
            None => request.body_bytes.len(),
        }
    }

    /// Reads request body bytes into `buffer` starting at `offset`, via the
    /// installed reader or the default byte-buffer reader.
    pub fn read_request_body(&self, offset: usize, buffer: &mut [u8]) -> HcResult<usize> {
        let reader = self.request.lock().unwrap().body_reader.clone();
        match reader {
            Some(reader) => (reader.read)(self, offset, buffer),
            None => {
                let request = self.request.lock().unwrap();
                if offset > request.body_bytes.len() {
                    return Err(HcError::InvalidArg);
                }
                let available = request.body_bytes.len() - offset;
                let count = available.min(buffer.len());
                buffer[..count].copy_from_slice(&request.body_bytes[offset..offset + count]);
                Ok(count)
            }
        }
    }

    /// Drains the whole request body through the reader. The engine uses
    /// this before compressing; a reader serving fewer bytes than its
    /// declared size is an error.
    pub(crate) fn read_entire_request_body(&self) -> HcResult<Vec<u8>> {
        let size = self.request_body_size();
        let mut buffer = vec![0u8; size];
        let written = self.read_request_body(0, &mut buffer)?;
        if written < size {
            return Err(HcError::internal(
                "request body reader served fewer bytes than its declared size",
            ));
        }
        Ok(buffer)
    }

    /// Swaps the request body for its compressed form and restores the
    /// default byte-buffer reader.
    pub(crate) fn replace_request_body_with_compressed(&self, compressed: Vec<u8>) {
        let mut request = self.request.lock().unwrap();
        request.body_bytes = compressed;
        request.body_reader = None;
        request.headers.replace("Content-Encoding", "gzip");
    }

    /// Mock match fields: unlike `set_url`, an empty URL is legal here and
    /// means "match any call".
    pub(crate) fn set_match_fields(&self, method: &str, url: &str, body: &[u8]) -> HcResult<()> {
        self.ensure_mutable()?;
        let mut request = self.request.lock().unwrap();
        if !method.is_empty() {
            request.method = method.to_owned();
        }
        request.url = url.to_owned();
        request.body_bytes = body.to_vec();
        request.body_reader = None;
        Ok(())
    }

    pub fn set_header(&self, name: &str, value: &str) -> HcResult<()> {
        self.ensure_mutable()?;
        if name.is_empty() {
            return Err(HcError::InvalidArg);
        }
        self.request.lock().unwrap().headers.set(name, value);
        Ok(())
    }

    pub fn request_header(&self, name: &str) -> Option<String> {
        self.request
            .lock()
            .unwrap()
            .headers
            .get(name)
            .map(str::to_owned)
    }

    pub fn request_headers(&self) -> HeaderMap {
        self.request.lock().unwrap().headers.clone()
    }

    pub fn set_retry_allowed(&self, retry_allowed: bool) -> HcResult<()> {
        self.ensure_mutable()?;
        self.request.lock().unwrap().settings.retry_allowed = retry_allowed;
        Ok(())
    }

    pub fn set_retry_cache_id(&self, cache_id: u32) -> HcResult<()> {
        self.ensure_mutable()?;
        self.request.lock().unwrap().settings.retry_after_cache_id = cache_id;
        Ok(())
    }

    pub fn set_retry_delay(&self, base: Duration) -> HcResult<()> {
        self.ensure_mutable()?;
        self.request.lock().unwrap().settings.retry_delay_base = base;
        Ok(())
    }

    pub fn set_timeout(&self, timeout: Duration) -> HcResult<()> {
        self.ensure_mutable()?;
        self.request.lock().unwrap().settings.timeout = timeout;
        Ok(())
    }

    pub fn set_timeout_window(&self, window: Duration) -> HcResult<()> {
        self.ensure_mutable()?;
        self.request.lock().unwrap().settings.timeout_window = window;
        Ok(())
    }

    pub fn set_ssl_validation(&self, validate: bool) -> HcResult<()> {
        self.ensure_mutable()?;
        self.request.lock().unwrap().ssl_validation = validate;
        Ok(())
    }

    pub fn set_trace_call(&self, trace: bool) -> HcResult<()> {
        self.ensure_mutable()?;
        self.request.lock().unwrap().trace_call = trace;
        Ok(())
    }

    /// Opts the request body into gzip compression. Fails `NotSupported`
    /// when no compression backend was compiled in.
    pub fn enable_gzip_compression(&self, level: CompressionLevel) -> HcResult<()> {
        self.ensure_mutable()?;
        if !crate::compression::available() && level != CompressionLevel::None {
            return Err(HcError::NotSupported);
        }
        self.request.lock().unwrap().compression_level = level;
        Ok(())
    }

    /// Declares that the response body is expected gzip-compressed and
    /// should be decompressed before completion.
    pub fn set_compressed_response_expected(&self, expected: bool) -> HcResult<()> {
        self.ensure_mutable()?;
        self.request.lock().unwrap().compressed_response_expected = expected;
        Ok(())
    }

    pub fn retry_settings(&self) -> RetrySettings {
        self.request.lock().unwrap().settings.clone()
    }

    pub fn compression_level(&self) -> CompressionLevel {
        self.request.lock().unwrap().compression_level
    }

    pub fn compressed_response_expected(&self) -> bool {
        self.request.lock().unwrap().compressed_response_expected
    }

    pub fn ssl_validation(&self) -> bool {
        self.request.lock().unwrap().ssl_validation
    }

    pub fn trace_call(&self) -> bool {
        self.request.lock().unwrap().trace_call
    }

    pub fn set_context(&self, context: Arc<dyn Any + Send + Sync>) {
        *self.context.lock().unwrap() = Some(context);
    }

    pub fn context(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.context.lock().unwrap().clone()
    }

    // --- response ---

    pub fn status_code(&self) -> u32 {
        self.response.lock().unwrap().status_code
    }

    pub fn network_error_code(&self) -> HResult {
        self.response.lock().unwrap().network_error_code
    }

    pub fn platform_network_error_code(&self) -> i32 {
        self.response.lock().unwrap().platform_network_error_code
    }

    pub fn platform_network_error_message(&self) -> String {
        self.response
            .lock()
            .unwrap()
            .platform_network_error_message
            .clone()
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        self.response
            .lock()
            .unwrap()
            .headers
            .get(name)
            .map(str::to_owned)
    }

    pub fn response_headers(&self) -> HeaderMap {
        self.response.lock().unwrap().headers.clone()
    }

    pub fn response_body_bytes(&self) -> Vec<u8> {
        self.response.lock().unwrap().body.clone()
    }

    pub fn response_string(&self) -> String {
        String::from_utf8_lossy(&self.response.lock().unwrap().body).into_owned()
    }

    pub fn set_status_code(&self, status_code: u32) {
        self.response.lock().unwrap().status_code = status_code;
    }

    pub fn set_network_error(&self, error_code: HResult, platform_code: i32) {
        let mut response = self.response.lock().unwrap();
        response.network_error_code = error_code;
        response.platform_network_error_code = platform_code;
    }

    pub fn set_platform_network_error_message(&self, message: &str) {
        self.response.lock().unwrap().platform_network_error_message = message.to_owned();
    }

    pub fn set_response_header(&self, name: &str, value: &str) {
        self.response.lock().unwrap().headers.set(name, value);
    }

    /// Replaces the buffered response body wholesale (mock population).
    pub fn set_response_body_bytes(&self, body: &[u8]) {
        self.response.lock().unwrap().body = body.to_vec();
    }

    /// Routes produced response bytes through the installed write hook, or
    /// appends to the default buffer.
    pub fn write_response_body(&self, bytes: &[u8]) -> HcResult<()> {
        let writer = self.response.lock().unwrap().body_writer.clone();
        match writer {
            Some(writer) => writer(self, bytes),
            None => {
                self.response.lock().unwrap().body.extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    /// Redirects response body bytes to a client sink instead of the
    /// default buffer.
    pub fn set_response_body_write_fn(
        &self,
        write: impl Fn(&Call, &[u8]) -> HcResult<()> + Send + Sync + 'static,
    ) -> HcResult<()> {
        self.ensure_mutable()?;
        self.response.lock().unwrap().body_writer = Some(Arc::new(write));
        Ok(())
    }

    pub(crate) fn has_custom_response_writer(&self) -> bool {
        self.response.lock().unwrap().body_writer.is_some()
    }

    pub(crate) fn clear_response_writer(&self) {
        self.response.lock().unwrap().body_writer = None;
    }

    /// Clears response fields between retry attempts.
    pub(crate) fn reset_response_properties(&self) {
        let mut response = self.response.lock().unwrap();
        response.status_code = 0;
        response.network_error_code = S_OK;
        response.platform_network_error_code = 0;
        response.platform_network_error_message.clear();
        response.headers.clear();
        response.body.clear();
    }

    // --- engine bookkeeping ---

    pub(crate) fn try_latch_perform(&self) -> bool {
        !self.perform_called.swap(true, Ordering::SeqCst)
    }

    pub fn perform_called(&self) -> bool {
        self.perform_called.load(Ordering::SeqCst)
    }

    pub(crate) fn set_perform_start(&self, start: Instant) {
        *self.perform_start.lock().unwrap() = Some(start);
    }

    pub(crate) fn perform_start(&self) -> Option<Instant> {
        *self.perform_start.lock().unwrap()
    }

    pub(crate) fn next_attempt(&self) -> u32 {
        self.attempt_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number.load(Ordering::SeqCst)
    }

    pub(crate) fn set_websocket(&self, websocket: Arc<WebSocket>) {
        *self.websocket.lock().unwrap() = Some(websocket);
    }

    /// The websocket this call is upgrading, when it is a connect handshake.
    pub fn websocket(&self) -> Option<Arc<WebSocket>> {
        self.websocket.lock().unwrap().clone()
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        tracing::trace!(target: "httpclient", "HttpCall dropped [ID {}]", self.id);
    }
}
