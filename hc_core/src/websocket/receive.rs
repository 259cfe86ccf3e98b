use std::sync::Arc;

use super::{WebSocket, WebSocketCloseStatus, WebSocketState};

/// One transport read event. Fragment kinds carry a partial message; the
/// message kinds mark the end of the logical message they complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsReadKind {
    Utf8Fragment,
    BinaryFragment,
    Utf8Message,
    BinaryMessage,
    CloseFrame(WebSocketCloseStatus),
}

/// Receive-side accumulation state. The buffer starts with 4 KiB reserved
/// and accumulates until the message ends or the connection's configured
/// maximum is reached; once a partial message has been forwarded, the
/// remainder of that logical message keeps flowing through the fragment
/// handler.
pub(crate) struct ReceiveState {
    buffer: Vec<u8>,
    forwarding_fragments: bool,
}

impl ReceiveState {
    pub(crate) fn new() -> Self {
        ReceiveState {
            buffer: Vec::with_capacity(super::RECEIVE_BUFFER_INITIAL_SIZE),
            forwarding_fragments: false,
        }
    }
}

impl WebSocket {
    /// Transport entry point for received frames.
    ///
    /// Fragments accumulate until the buffer reaches the configured
    /// maximum, at which point the partial message is forwarded to the
    /// fragment handler and the buffer restarts. A message-completing read
    /// delivers either the final fragment (when forwarding already began)
    /// or the whole message to the text/binary handler.
    pub fn deliver_read(self: &Arc<Self>, bytes: &[u8], kind: WsReadKind) {
        if let WsReadKind::CloseFrame(close_status) = kind {
            tracing::info!(target: "websocket", "WebSocket close frame [ID {}] status {:?}", self.id(), close_status);
            self.on_disconnected(close_status);
            return;
        }

        let end_of_message =
            matches!(kind, WsReadKind::Utf8Message | WsReadKind::BinaryMessage);
        let binary = matches!(
            kind,
            WsReadKind::BinaryMessage | WsReadKind::BinaryFragment | WsReadKind::Utf8Fragment
        );

        let flush: Option<(Vec<u8>, bool)> = {
            let mut receive = self.receive.lock().unwrap();
            receive.buffer.extend_from_slice(bytes);

            if end_of_message {
                let payload = std::mem::take(&mut receive.buffer);
                let is_fragment = receive.forwarding_fragments;
                receive.forwarding_fragments = false;
                Some((payload, is_fragment))
            } else if receive.buffer.len() >= self.max_receive_buffer_size() {
                // Buffer full mid-message: hand the partial payload to the
                // fragment handler and keep reading.
                let payload = std::mem::take(&mut receive.buffer);
                receive.forwarding_fragments = true;
                Some((payload, true))
            } else {
                None
            }
        };

        if let Some((payload, is_fragment)) = flush {
            self.dispatch_message(payload, binary, end_of_message, is_fragment);
        }
    }

    fn dispatch_message(
        self: &Arc<Self>,
        payload: Vec<u8>,
        binary: bool,
        end_of_message: bool,
        is_fragment: bool,
    ) {
        let fragment_handler = self.binary_fragment_handler.lock().unwrap().clone();
        if is_fragment || !end_of_message {
            // Partial messages may not be whole UTF-8, so they are always
            // delivered as binary.
            if let Some(handler) = fragment_handler {
                handler(self, &payload, end_of_message);
                return;
            }
        }

        if binary {
            let handler = self.binary_message_handler.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler(self, &payload);
            }
        } else {
            let handler = self.message_handler.lock().unwrap().clone();
            if let Some(handler) = handler {
                let text = String::from_utf8_lossy(&payload);
                handler(self, &text);
            }
        }
    }

    /// Transport entry point for connection teardown: the peer's close
    /// frame, or a channel error while connected or closing.
    pub fn on_disconnected(self: &Arc<Self>, close_status: WebSocketCloseStatus) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == WebSocketState::Closed {
                return;
            }
            *state = WebSocketState::Closed;
        }
        let handler = self.close_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(self, close_status);
        }
    }
}
