use std::ffi::{CStr, CString, c_char};
use std::sync::Arc;

use crate::config::InitArgs;
use crate::error::S_OK;
use crate::handle_manager::{Handle, HandleManager};
use crate::http::Call;
use crate::trace;

pub static CALL_HANDLE_MANAGER: HandleManager<Call> = HandleManager::new();

const LIB_VERSION_C: &[u8] = b"2026.07.20260715.1\0";

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CApiHandle {
    pub id: u64,
    pub magic: u64,
}

impl CApiHandle {
    pub fn from_handle(handle: Handle) -> Self {
        CApiHandle {
            id: handle.id,
            magic: handle.magic,
        }
    }

    pub fn to_handle(&self) -> Handle {
        Handle {
            id: self.id,
            magic: self.magic,
        }
    }
}

/// C trace sink: `(level, area, thread id, milliseconds since start,
/// message)`.
pub type CTraceCallback = unsafe extern "C" fn(
    level: u32,
    area: *const c_char,
    thread_id: u64,
    timestamp_ms: u64,
    message: *const c_char,
) -> u32;

#[unsafe(no_mangle)]
pub extern "C" fn hc_initialize() -> u32 {
    match crate::global::initialize(InitArgs::default()) {
        Ok(()) => S_OK as u32,
        Err(e) => e.to_hresult() as u32,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hc_cleanup() {
    crate::global::cleanup();
}

#[unsafe(no_mangle)]
pub extern "C" fn hc_lib_version() -> *const c_char {
    LIB_VERSION_C.as_ptr() as *const c_char
}

#[unsafe(no_mangle)]
pub extern "C" fn hc_trace_set_callback(callback: CTraceCallback) -> u32 {
    trace::set_client_callback(Some(Arc::new(
        move |area: &str, level: trace::TraceLevel, thread_id: u64, timestamp_ms: u64, message: &str| {
            let area = CString::new(area).unwrap_or_default();
            let message = CString::new(message).unwrap_or_default();
            unsafe {
                callback(
                    level as u32,
                    area.as_ptr(),
                    thread_id,
                    timestamp_ms,
                    message.as_ptr(),
                )
            };
        },
    )));
    S_OK as u32
}

#[unsafe(no_mangle)]
pub extern "C" fn hc_call_create() -> CApiHandle {
    match Call::new() {
        Ok(call) => CApiHandle::from_handle(CALL_HANDLE_MANAGER.add_handle(call)),
        Err(e) => {
            tracing::error!(target: "httpclient", "hc_call_create failed: {e}");
            CApiHandle { id: 0, magic: 0 }
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hc_call_close(call: CApiHandle) {
    CALL_HANDLE_MANAGER.delete_handle(call.to_handle());
}

/// # Safety
/// `method` and `url` must be valid NUL-terminated C strings for the
/// duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hc_call_set_url(
    call: CApiHandle,
    method: *const c_char,
    url: *const c_char,
) -> u32 {
    if method.is_null() || url.is_null() {
        return crate::error::E_INVALIDARG as u32;
    }
    let Some(call) = CALL_HANDLE_MANAGER.get_obj(call.to_handle()) else {
        return crate::error::E_INVALIDARG as u32;
    };
    let method = unsafe { CStr::from_ptr(method) }.to_string_lossy();
    let url = unsafe { CStr::from_ptr(url) }.to_string_lossy();
    match call.set_url(&method, &url) {
        Ok(()) => S_OK as u32,
        Err(e) => e.to_hresult() as u32,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hc_call_status_code(call: CApiHandle) -> u32 {
    CALL_HANDLE_MANAGER
        .get_obj(call.to_handle())
        .map(|call| call.status_code())
        .unwrap_or(0)
}
