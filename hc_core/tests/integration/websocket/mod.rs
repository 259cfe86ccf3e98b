use std::sync::{Arc, Mutex};

use hc_core::error::{E_FAIL, S_OK};
use hc_core::task::AsyncOp;
use hc_core::websocket::{self, WebSocketCloseStatus, WebSocketResult, WebSocketState};
use hc_core::{HcError, Mock, WebSocket, WebSocketHandlers};

use crate::common::{Env, HoldingWsTransport};

fn upgrade_mock(url: &str, status: u32) -> hc_core::MockHandle {
    let mock = Mock::new().unwrap();
    mock.set_status_code(status);
    hc_core::add_mock(&mock, "GET", url, b"").unwrap();
    mock
}

async fn connected_socket(env: &Env, url: &str) -> Arc<WebSocket> {
    let _mock = upgrade_mock(url, 101);
    let websocket = WebSocket::new(WebSocketHandlers::default()).unwrap();
    let op: AsyncOp<WebSocketResult> = AsyncOp::new(&env.queue);
    websocket::connect_async(url, "", &websocket, &op).unwrap();
    let result = op.wait().await.unwrap();
    assert_eq!(result.error_code, S_OK);
    assert_eq!(websocket.state(), WebSocketState::Connected);
    websocket
}

#[tokio::test]
async fn upgrade_101_connects_the_socket() {
    // Given a mocked 101 upgrade response
    let env = Env::new();
    let websocket = connected_socket(&env, "wss://example/chat").await;

    // Then the handshake ran through the call engine with retries disabled
    let upgrade = websocket.upgrade_call().unwrap();
    assert_eq!(upgrade.status_code(), 101);
    assert_eq!(upgrade.attempt_number(), 1);
    assert!(!upgrade.retry_settings().retry_allowed);
    env.shutdown().await;
}

#[tokio::test]
async fn upgrade_failure_reports_through_the_connect_result() {
    // Given an endpoint refusing the upgrade
    let env = Env::new();
    let _mock = upgrade_mock("wss://example/denied", 403);

    let websocket = WebSocket::new(WebSocketHandlers::default()).unwrap();
    let op: AsyncOp<WebSocketResult> = AsyncOp::new(&env.queue);
    websocket::connect_async("wss://example/denied", "", &websocket, &op).unwrap();
    let result = op.wait().await.unwrap();

    // Then the connect op carries the failure and the socket is closed
    assert_eq!(result.error_code, E_FAIL);
    assert_eq!(websocket.state(), WebSocketState::Closed);
    env.shutdown().await;
}

#[tokio::test]
async fn connect_is_callable_only_once_per_handle() {
    let env = Env::new();
    let websocket = connected_socket(&env, "wss://example/once").await;

    let op: AsyncOp<WebSocketResult> = AsyncOp::new(&env.queue);
    assert_eq!(
        websocket::connect_async("wss://example/once", "", &websocket, &op),
        Err(HcError::ConnectAlreadyCalled)
    );
    assert_eq!(
        websocket.set_header("X-Late", "no"),
        Err(HcError::ConnectAlreadyCalled)
    );
    env.shutdown().await;
}

#[tokio::test]
async fn sub_protocol_rides_the_upgrade_request() {
    let env = Env::new();
    let _mock = upgrade_mock("wss://example/proto", 101);

    let websocket = WebSocket::new(WebSocketHandlers::default()).unwrap();
    let op: AsyncOp<WebSocketResult> = AsyncOp::new(&env.queue);
    websocket::connect_async("wss://example/proto", "v1.chat", &websocket, &op).unwrap();
    op.wait().await.unwrap();

    let upgrade = websocket.upgrade_call().unwrap();
    assert_eq!(
        upgrade.request_header("Sec-WebSocket-Protocol").as_deref(),
        Some("v1.chat")
    );
    env.shutdown().await;
}

#[tokio::test]
async fn sends_are_serialized_one_in_flight_at_a_time() {
    // Given a connected socket and a transport that holds sends
    let env = Env::new();
    let websocket = connected_socket(&env, "wss://example/queue").await;
    let transport = HoldingWsTransport::install();

    let completion_order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut ops = Vec::new();
    for name in ["first", "second", "third"] {
        let order = completion_order.clone();
        let op = AsyncOp::with_callback(&env.queue, move |_op: &AsyncOp<WebSocketResult>| {
            order.lock().unwrap().push(name);
        });
        websocket::send_message_async(&websocket, name, &op).unwrap();
        ops.push(op);
    }

    // Then only the first send reached the transport
    assert_eq!(transport.pending_count(), 1);
    assert_eq!(transport.pending_payloads(), vec![b"first".to_vec()]);

    // When sends complete, the next queued send is issued each time
    transport.complete_next();
    ops[0].wait().await.unwrap();
    assert_eq!(transport.pending_payloads(), vec![b"second".to_vec()]);

    transport.complete_next();
    ops[1].wait().await.unwrap();
    assert_eq!(transport.pending_payloads(), vec![b"third".to_vec()]);

    transport.complete_next();
    ops[2].wait().await.unwrap();
    assert_eq!(transport.pending_count(), 0);

    // And completion order matches enqueue order
    assert_eq!(*completion_order.lock().unwrap(), vec!["first", "second", "third"]);
    env.shutdown().await;
}

#[tokio::test]
async fn disconnect_walks_closing_to_closed_and_fires_the_close_handler() {
    // Given a connected socket with a close handler
    let env = Env::new();
    let _mock = upgrade_mock("wss://example/bye", 101);

    let closes: Arc<Mutex<Vec<WebSocketCloseStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let observed = closes.clone();
    let websocket = WebSocket::new(WebSocketHandlers {
        on_close: Some(Arc::new(move |_ws, status| {
            observed.lock().unwrap().push(status);
        })),
        ..WebSocketHandlers::default()
    })
    .unwrap();
    let op: AsyncOp<WebSocketResult> = AsyncOp::new(&env.queue);
    websocket::connect_async("wss://example/bye", "", &websocket, &op).unwrap();
    op.wait().await.unwrap();

    let transport = HoldingWsTransport::install();

    // When the client disconnects
    websocket::disconnect(&websocket, WebSocketCloseStatus::Normal).unwrap();

    // Then the transport saw the shutdown and the peer close frame landed
    assert_eq!(
        *transport.disconnects.lock().unwrap(),
        vec![WebSocketCloseStatus::Normal]
    );
    assert_eq!(websocket.state(), WebSocketState::Closed);
    assert_eq!(*closes.lock().unwrap(), vec![WebSocketCloseStatus::Normal]);

    // And sends on the closed socket are rejected up front
    let op: AsyncOp<WebSocketResult> = AsyncOp::new(&env.queue);
    assert_eq!(
        websocket::send_message_async(&websocket, "too late", &op),
        Err(HcError::InvalidArg)
    );
    env.shutdown().await;
}
