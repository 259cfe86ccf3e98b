use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{E_FAIL, E_TIMEOUT, HcError};
use crate::http::CallHandle;
use crate::task::AsyncOp;
use crate::transport::Transport;

/// Default HTTP transport over reqwest. One physical exchange per
/// `perform_async`; WebSocket operations are not supported and fall back to
/// the trait's `NotSupported` defaults, like the generic providers of
/// platforms without a native websocket stack.
pub struct ReqwestTransport {
    /// Clients keyed by whether TLS validation is enabled, built lazily so
    /// a proxy change can drop them.
    clients: Mutex<HashMap<bool, reqwest::Client>>,
    proxy: Mutex<Option<String>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        ReqwestTransport {
            clients: Mutex::new(HashMap::new()),
            proxy: Mutex::new(None),
        }
    }

    fn client_for(&self, ssl_validation: bool) -> Result<reqwest::Client, HcError> {
        let mut clients = self.clients.lock().unwrap();
        if let Some(client) = clients.get(&ssl_validation) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder();
        if !ssl_validation {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(proxy_uri) = self.proxy.lock().unwrap().as_deref() {
            let proxy = reqwest::Proxy::all(proxy_uri).map_err(|_| HcError::InvalidArg)?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| HcError::internal(format!("building http client: {e}")))?;
        clients.insert(ssl_validation, client.clone());
        Ok(client)
    }

    async fn perform(client: reqwest::Client, call: CallHandle, op: AsyncOp<()>) {
        let method = match reqwest::Method::from_bytes(call.method().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                call.set_network_error(E_FAIL, 0);
                call.set_platform_network_error_message("invalid request method");
                op.complete(Ok(()));
                return;
            }
        };

        let body = match call.read_entire_request_body() {
            Ok(body) => body,
            Err(e) => {
                call.set_network_error(E_FAIL, 0);
                call.set_platform_network_error_message(&e.to_string());
                op.complete(Ok(()));
                return;
            }
        };

        let mut request = client
            .request(method, call.url())
            .timeout(call.retry_settings().timeout);
        for (name, value) in call.request_headers().iter() {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        match request.send().await {
            Ok(mut response) => {
                call.set_status_code(response.status().as_u16() as u32);
                for (name, value) in response.headers() {
                    if let Ok(value) = value.to_str() {
                        call.set_response_header(name.as_str(), value);
                    }
                }
                loop {
                    match response.chunk().await {
                        Ok(Some(chunk)) => {
                            if let Err(e) = call.write_response_body(&chunk) {
                                call.set_network_error(E_FAIL, 0);
                                call.set_platform_network_error_message(&e.to_string());
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            call.set_network_error(transport_error_code(&e), 0);
                            call.set_platform_network_error_message(&e.to_string());
                            break;
                        }
                    }
                }
                op.complete(Ok(()));
            }
            Err(e) => {
                call.set_network_error(transport_error_code(&e), 0);
                call.set_platform_network_error_message(&e.to_string());
                op.complete(Ok(()));
            }
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_error_code(e: &reqwest::Error) -> i32 {
    if e.is_timeout() { E_TIMEOUT } else { E_FAIL }
}

impl Transport for ReqwestTransport {
    fn perform_async(&self, call: CallHandle, op: AsyncOp<()>) {
        if call.websocket().is_some() {
            // Upgrade handshakes need a websocket-capable transport.
            op.complete(Err(HcError::NotSupported));
            return;
        }

        let client = match self.client_for(call.ssl_validation()) {
            Ok(client) => client,
            Err(e) => {
                op.complete(Err(e));
                return;
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Self::perform(client, call, op));
            }
            Err(_) => {
                op.complete(Err(HcError::internal(
                    "reqwest transport requires an ambient tokio runtime",
                )));
            }
        }
    }

    fn set_global_proxy(&self, proxy_uri: &str) -> crate::error::HcResult<()> {
        *self.proxy.lock().unwrap() = Some(proxy_uri.to_owned());
        self.clients.lock().unwrap().clear();
        Ok(())
    }
}
