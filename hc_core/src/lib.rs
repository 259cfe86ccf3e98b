pub mod c_api;
pub mod compression;
pub mod config;
pub mod error;
pub mod global;
pub mod handle_manager;
pub mod headers;
pub mod http;
pub mod mock;
pub mod task;
pub mod trace;
pub mod transport;
pub mod websocket;

pub use config::{CompressionLevel, InitArgs, RetrySettings};
pub use error::{HcError, HcResult};
pub use global::{
    add_call_routed_handler, cleanup, initialize, lib_version, remove_call_routed_handler,
    set_transport, transport,
};
pub use headers::HeaderMap;
pub use http::engine::perform_async;
pub use http::{Call, CallHandle};
pub use mock::{Mock, MockHandle, add_mock, clear_mocks, remove_mock};
pub use task::{AsyncOp, Port, TaskQueue};
pub use websocket::{
    WebSocket, WebSocketCloseStatus, WebSocketHandlers, WebSocketResult, WebSocketState,
    WsMessageKind, WsReadKind,
};
