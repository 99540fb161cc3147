//! Shared helpers for the server scenario tests

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use chat_relay::message::notices;
use chat_relay::{ChatClient, Message, Server, ServerConfig, ServerHandle};
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
    pub task: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

/// Local config on an ephemeral port
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        handshake_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

/// Start a server on an ephemeral local port
pub async fn start_server() -> TestServer {
    start_server_with(test_config()).await
}

pub async fn start_server_with(config: ServerConfig) -> TestServer {
    let server = Server::bind(config).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let handle = server.handle();
    let task = tokio::spawn(server.run());

    TestServer { addr, handle, task }
}

/// Fail the test instead of hanging
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, fut)
        .await
        .expect("timed out waiting")
}

/// Connect and wait until our own join notice arrives, so the session is
/// registered before the caller goes on
pub async fn connect(server: &TestServer, username: &str) -> ChatClient {
    let mut client = within(ChatClient::connect(&server.url(), username))
        .await
        .expect("connect");
    wait_for_notice(&mut client, &notices::joined(username)).await;
    client
}

/// Next record, panicking on close or error
pub async fn recv(client: &mut ChatClient) -> Message {
    within(client.recv())
        .await
        .expect("receive failed")
        .expect("connection closed")
}

/// Next record that is not a server notice
pub async fn next_chat(client: &mut ChatClient) -> Message {
    loop {
        let msg = recv(client).await;
        if !msg.is_notice() {
            return msg;
        }
    }
}

/// Skip records until a notice with exactly this body arrives
pub async fn wait_for_notice(client: &mut ChatClient, body: &str) {
    loop {
        let msg = recv(client).await;
        if msg.is_notice() && msg.body == body {
            return;
        }
    }
}

/// True once the server has closed this connection
pub async fn is_closed(client: &mut ChatClient) -> bool {
    loop {
        match within(client.recv()).await {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return true,
        }
    }
}
