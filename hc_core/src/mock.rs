use std::sync::{Arc, Mutex};

use crate::error::{HResult, HcError, HcResult};
use crate::http::{Call, CallHandle};

/// Fired when a registered mock intercepts a call; receives the live
/// request's method, URL, and body bytes.
pub type MatchedCallback = dyn Fn(&Arc<Mock>, &str, &str, &[u8]) + Send + Sync;

/// A canned response registered process-wide. The embedded call carries the
/// match fields (method/URL/body) and the response to serve.
pub struct Mock {
    call: CallHandle,
    matched_callback: Mutex<Option<Arc<MatchedCallback>>>,
}

pub type MockHandle = Arc<Mock>;

impl Mock {
    pub fn new() -> HcResult<MockHandle> {
        let call = Call::new()?;
        Ok(Arc::new(Mock {
            call,
            matched_callback: Mutex::new(None),
        }))
    }

    /// The mock's backing call; response population goes through the
    /// regular call-response setters.
    pub fn call(&self) -> &CallHandle {
        &self.call
    }

    pub fn set_matched_callback(
        &self,
        callback: impl Fn(&Arc<Mock>, &str, &str, &[u8]) + Send + Sync + 'static,
    ) {
        *self.matched_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    // Response population conveniences, forwarded to the backing call.

    pub fn set_status_code(&self, status_code: u32) {
        self.call.set_status_code(status_code);
    }

    pub fn set_network_error(&self, error_code: HResult, platform_code: i32) {
        self.call.set_network_error(error_code, platform_code);
    }

    pub fn set_response_header(&self, name: &str, value: &str) {
        self.call.set_response_header(name, value);
    }

    pub fn set_response_body_bytes(&self, body: &[u8]) {
        self.call.set_response_body_bytes(body);
    }

    fn matches(&self, call: &Call) -> bool {
        let mock_url = self.call.url();
        if mock_url.is_empty() {
            return true;
        }
        if !call.url().starts_with(&mock_url) {
            return false;
        }
        let mock_body = self.call.request_body_bytes();
        mock_body.is_empty() || call.request_body_bytes() == mock_body
    }
}

/// Registers a mock. `method`/`url`/`body` are the match fields; empty URL
/// matches any call, empty body matches any body. Selection among multiple
/// matching mocks is most-recently-added first.
pub fn add_mock(mock: &MockHandle, method: &str, url: &str, body: &[u8]) -> HcResult<()> {
    let state = crate::global::state().ok_or(HcError::NotInitialized)?;
    mock.call.set_match_fields(method, url, body)?;
    state.mocks.lock().unwrap().push(mock.clone());
    tracing::info!(target: "httpclient", "MockAddMock [ID {}] url={url}", mock.call.id());
    Ok(())
}

/// Unregisters one mock; unknown handles are an error.
pub fn remove_mock(mock: &MockHandle) -> HcResult<()> {
    let state = crate::global::state().ok_or(HcError::NotInitialized)?;
    let mut mocks = state.mocks.lock().unwrap();
    let before = mocks.len();
    mocks.retain(|registered| !Arc::ptr_eq(registered, mock));
    if mocks.len() == before {
        return Err(HcError::InvalidArg);
    }
    Ok(())
}

pub fn clear_mocks() -> HcResult<()> {
    let state = crate::global::state().ok_or(HcError::NotInitialized)?;
    state.mocks.lock().unwrap().clear();
    Ok(())
}

/// Engine hook: intercepts a call about to hit the transport. Walks the
/// registry newest-first and serves the first match, copying its response
/// onto the live call. The matched callback runs outside the registry lock
/// so it may re-enter mock registration.
pub(crate) fn intercept(call: &CallHandle) -> bool {
    let Some(state) = crate::global::state() else {
        return false;
    };

    let matched = {
        let mocks = state.mocks.lock().unwrap();
        mocks.iter().rev().find(|mock| mock.matches(call)).cloned()
    };
    let Some(mock) = matched else {
        return false;
    };

    let callback = mock.matched_callback.lock().unwrap().clone();
    if let Some(callback) = callback {
        callback(
            &mock,
            &call.method(),
            &call.url(),
            &call.request_body_bytes(),
        );
    }

    call.set_response_body_bytes(&mock.call.response_body_bytes());
    call.set_status_code(mock.call.status_code());
    call.set_network_error(
        mock.call.network_error_code(),
        mock.call.platform_network_error_code(),
    );
    for (name, value) in mock.call.response_headers().iter() {
        call.set_response_header(name, value);
    }

    if call.trace_call() {
        tracing::info!(target: "httpclient", "Mock matched [ID {}] status {}", call.id(), call.status_code());
    }
    true
}
