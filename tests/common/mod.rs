//! Shared helpers for integration tests: throwaway backends and a proxy
//! instance bound to an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use palisade::config::ProxyConfig;
use palisade::net::Listener;
use palisade::plugin::ProxyPlugin;
use palisade::{Pipeline, ProxyServer, Shutdown};

/// Start a backend that answers every connection with one fixed 200
/// response, after consuming the request head.
pub async fn start_backend(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that answers with `101 Switching Protocols` plus a
/// WebSocket upgrade header, then echoes every byte until the peer closes.
pub async fn start_upgrade_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let head = "HTTP/1.1 101 Switching Protocols\r\n\
                            Upgrade: websocket\r\n\
                            Connection: Upgrade\r\n\r\n";
                let _ = socket.write_all(head.as_bytes()).await;
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that echoes every byte back until the peer closes.
/// Used to verify tunneled traffic passes through unmodified.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a proxy with the given plugins on an ephemeral port.
///
/// The returned `Shutdown` stops the server when triggered (or when the
/// test drops everything at exit).
pub async fn start_proxy(plugins: Vec<Arc<dyn ProxyPlugin>>) -> (SocketAddr, Shutdown) {
    let config = ProxyConfig {
        listener: palisade::config::ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    let mut pipeline = Pipeline::new(plugins).unwrap();
    pipeline.initialize().unwrap();

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = ProxyServer::new(config, pipeline);
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

/// Send raw bytes to the proxy and collect the full response until close.
pub async fn roundtrip(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

async fn read_head(socket: &mut TcpStream) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
}
