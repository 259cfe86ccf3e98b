use std::sync::Arc;

use crate::error::{HcError, HcResult};
use crate::http::CallHandle;
use crate::task::AsyncOp;
use crate::websocket::{WebSocket, WebSocketCloseStatus, WebSocketResult, WsMessageKind};

#[cfg(feature = "reqwest-transport")]
mod reqwest_transport;

#[cfg(feature = "reqwest-transport")]
pub use reqwest_transport::ReqwestTransport;

/// The pluggable wire-level provider. The engine hands it one call per
/// physical attempt; WebSocket-capable transports additionally own the
/// upgraded channel after a connect handshake.
///
/// `perform_async` contract: perform exactly one HTTP exchange, write the
/// outcome onto the call (status, headers, body through
/// `Call::write_response_body`, or `network_error_code` plus platform
/// code/message for transport-level failures), and complete `op` with `Ok`
/// regardless of protocol-level errors. Completing `op` with an error is
/// reserved for the transport itself being unusable.
pub trait Transport: Send + Sync {
    fn perform_async(&self, call: CallHandle, op: AsyncOp<()>);

    /// Sends one message on a connected websocket and completes `op` with
    /// the send result once the frame is on the wire.
    fn websocket_send_async(
        &self,
        websocket: Arc<WebSocket>,
        payload: Vec<u8>,
        kind: WsMessageKind,
        op: AsyncOp<WebSocketResult>,
    ) {
        let _ = (websocket, payload, kind);
        op.complete(Err(HcError::NotSupported));
    }

    /// Starts the close handshake. The eventual peer close frame (or
    /// channel error) is reported back through the websocket's receive
    /// path.
    fn websocket_disconnect(
        &self,
        websocket: Arc<WebSocket>,
        close_status: WebSocketCloseStatus,
    ) -> HcResult<()> {
        let _ = (websocket, close_status);
        Err(HcError::NotSupported)
    }

    fn set_global_proxy(&self, proxy_uri: &str) -> HcResult<()> {
        let _ = proxy_uri;
        Err(HcError::NotSupported)
    }
}
