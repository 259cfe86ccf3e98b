mod common;
mod http;
mod websocket;
