use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use hc_core::error::S_OK;
use hc_core::task::AsyncOp;
use hc_core::Call;

use crate::common::Env;

async fn spawn_test_server<F, Fut>(
    max_requests: usize,
    responder: F,
) -> (SocketAddr, Arc<AtomicUsize>, tokio::task::JoinHandle<()>)
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Vec<u8>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let requests_clone = requests.clone();
    let responder = Arc::new(responder);

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = requests_clone.fetch_add(1, Ordering::SeqCst) + 1;
            let responder = responder.clone();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = responder(request).await;
            stream.write_all(&response).await.unwrap();
            let _ = stream.shutdown().await;
            if request >= max_requests {
                break;
            }
        }
    });

    (addr, requests, handle)
}

#[tokio::test]
async fn default_transport_performs_a_real_exchange() {
    // Given a local server answering 200 "ok"
    let env = Env::new();
    let (addr, requests, server) = spawn_test_server(1, |_| async move {
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok".to_vec()
    })
    .await;

    // When a call performs through the default transport
    let call = Call::new().unwrap();
    call.set_url("GET", &format!("http://{addr}/")).unwrap();
    let op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&call, &op).unwrap();
    op.wait().await.unwrap();

    // Then the wire response is on the call
    assert_eq!(call.status_code(), 200);
    assert_eq!(call.response_body_bytes(), b"ok");
    assert_eq!(call.network_error_code(), S_OK);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    server.await.unwrap();
    env.shutdown().await;
}

#[tokio::test]
async fn default_transport_retries_a_transient_503() {
    // Given a server that fails once then succeeds
    let env = Env::new();
    let (addr, requests, server) = spawn_test_server(2, |request| async move {
        if request == 1 {
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nRetry-After: 0\r\nConnection: close\r\n\r\n"
                .to_vec()
        } else {
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok".to_vec()
        }
    })
    .await;

    let call = Call::new().unwrap();
    call.set_url("GET", &format!("http://{addr}/")).unwrap();
    call.set_retry_delay(Duration::from_secs(1)).unwrap();
    call.set_timeout_window(Duration::from_secs(60)).unwrap();

    let op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&call, &op).unwrap();
    op.wait().await.unwrap();

    assert_eq!(call.status_code(), 200);
    assert_eq!(call.response_body_bytes(), b"ok");
    assert_eq!(call.attempt_number(), 2);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
    server.await.unwrap();
    env.shutdown().await;
}

#[tokio::test]
async fn connection_failure_lands_in_the_network_error_code() {
    // Given a port nothing listens on
    let env = Env::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let call = Call::new().unwrap();
    call.set_url("GET", &format!("http://{addr}/")).unwrap();
    call.set_retry_allowed(false).unwrap();

    // When the perform completes
    let op = AsyncOp::new(&env.queue);
    hc_core::perform_async(&call, &op).unwrap();
    let result = op.wait().await;

    // Then the op itself is Ok and the failure is on the call
    assert_eq!(result, Ok(()));
    assert_ne!(call.network_error_code(), S_OK);
    assert!(!call.platform_network_error_message().is_empty());
    assert_eq!(call.status_code(), 0);
    env.shutdown().await;
}
