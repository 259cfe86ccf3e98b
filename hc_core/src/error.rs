use snafu::Snafu;

/// HRESULT-shaped 32-bit code carried on a call's `network_error_code` field
/// and across the C API boundary. `S_OK` (0) is the success sentinel.
pub type HResult = i32;

pub const S_OK: HResult = 0;
pub const E_FAIL: HResult = 0x8000_4005_u32 as i32;
pub const E_ABORT: HResult = 0x8000_4004_u32 as i32;
pub const E_INVALIDARG: HResult = 0x8007_0057_u32 as i32;
pub const E_OUTOFMEMORY: HResult = 0x8007_000E_u32 as i32;
pub const E_NOTIMPL: HResult = 0x8000_4001_u32 as i32;
pub const E_UNEXPECTED: HResult = 0x8000_FFFF_u32 as i32;
pub const E_TIMEOUT: HResult = 0x8007_05B4_u32 as i32;

pub const E_HC_NOT_INITIALISED: HResult = 0x8923_5001_u32 as i32;
pub const E_HC_PERFORM_ALREADY_CALLED: HResult = 0x8923_5003_u32 as i32;
pub const E_HC_ALREADY_INITIALISED: HResult = 0x8923_5004_u32 as i32;
pub const E_HC_CONNECT_ALREADY_CALLED: HResult = 0x8923_5005_u32 as i32;
pub const E_HC_NO_NETWORK: HResult = 0x8923_5006_u32 as i32;
pub const E_HC_NETWORK_NOT_INITIALIZED: HResult = 0x8923_5007_u32 as i32;

/// Central error taxonomy. Request-shape errors are returned synchronously
/// from API calls; engine-level failures complete the pending async op with
/// the error. Transport-level failures never appear here, they surface on
/// the call object's `network_error_code` instead.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum HcError {
    #[snafu(display("null or invalid parameter"))]
    InvalidArg,
    #[snafu(display("library not initialized, call initialize() first"))]
    NotInitialized,
    #[snafu(display("library already initialized"))]
    AlreadyInitialized,
    #[snafu(display("request mutated after perform began"))]
    PerformAlreadyCalled,
    #[snafu(display("websocket connect already called on this handle"))]
    ConnectAlreadyCalled,
    #[snafu(display("no network available"))]
    NoNetwork,
    #[snafu(display("transport-level failure (platform code {platform_code})"))]
    NetworkError { platform_code: i32 },
    #[snafu(display("no transport registered"))]
    NetworkNotInitialized,
    #[snafu(display("operation timed out"))]
    Timeout,
    #[snafu(display("allocation failure"))]
    OutOfMemory,
    #[snafu(display("operation not supported in this configuration"))]
    NotSupported,
    #[snafu(display("operation aborted"))]
    Aborted,
    #[snafu(display("internal error: {message}"))]
    Internal { message: String },
}

impl HcError {
    pub fn to_hresult(&self) -> HResult {
        match self {
            HcError::InvalidArg => E_INVALIDARG,
            HcError::NotInitialized => E_HC_NOT_INITIALISED,
            HcError::AlreadyInitialized => E_HC_ALREADY_INITIALISED,
            HcError::PerformAlreadyCalled => E_HC_PERFORM_ALREADY_CALLED,
            HcError::ConnectAlreadyCalled => E_HC_CONNECT_ALREADY_CALLED,
            HcError::NoNetwork => E_HC_NO_NETWORK,
            HcError::NetworkError { .. } => E_FAIL,
            HcError::NetworkNotInitialized => E_HC_NETWORK_NOT_INITIALIZED,
            HcError::Timeout => E_TIMEOUT,
            HcError::OutOfMemory => E_OUTOFMEMORY,
            HcError::NotSupported => E_NOTIMPL,
            HcError::Aborted => E_ABORT,
            HcError::Internal { .. } => E_UNEXPECTED,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        HcError::Internal {
            message: message.into(),
        }
    }
}

pub type HcResult<T> = Result<T, HcError>;
