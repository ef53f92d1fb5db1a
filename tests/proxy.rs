//! End-to-end tests: real sockets through a real proxy instance.

mod common;

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use palisade::firewall::{Firewall, Rule};
use palisade::plugin::{PluginError, ProxyPlugin};
use palisade::http::HttpRequest;

/// Response-hook test plugin: appends a tag, or fails on demand.
struct Marker {
    name: &'static str,
    tag: &'static [u8],
    fail: bool,
}

impl Marker {
    fn tagging(name: &'static str, tag: &'static [u8]) -> Arc<dyn ProxyPlugin> {
        Arc::new(Self {
            name,
            tag,
            fail: false,
        })
    }

    fn failing(name: &'static str) -> Arc<dyn ProxyPlugin> {
        Arc::new(Self {
            name,
            tag: b"",
            fail: true,
        })
    }
}

impl ProxyPlugin for Marker {
    fn name(&self) -> &str {
        self.name
    }

    fn handle_response(
        &self,
        mut response: Vec<u8>,
        _request: &HttpRequest,
    ) -> Result<Vec<u8>, PluginError> {
        if self.fail {
            return Err(PluginError::new("marker exploded"));
        }
        response.extend_from_slice(self.tag);
        Ok(response)
    }
}

fn get(path: &str, host: impl std::fmt::Display) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n\r\n").into_bytes()
}

#[tokio::test]
async fn forwards_a_get_and_relays_the_response() {
    let backend = common::start_backend("hello from backend").await;
    let (proxy, _shutdown) = common::start_proxy(vec![]).await;

    let response = common::roundtrip(proxy, &get("/", backend)).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("hello from backend"), "{text}");
}

#[tokio::test]
async fn absolute_uri_targets_are_reduced_and_forwarded() {
    let backend = common::start_backend("absolute ok").await;
    let (proxy, _shutdown) = common::start_proxy(vec![]).await;

    let request = format!("GET http://{backend}/some/path HTTP/1.1\r\n\r\n");
    let response = common::roundtrip(proxy, request.as_bytes()).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.ends_with("absolute ok"), "{text}");
}

#[tokio::test]
async fn firewall_denial_answers_403_without_contacting_upstream() {
    let backend = common::start_backend("should not be seen").await;

    let firewall = Firewall::new();
    firewall.set_rules(vec![Rule::deny().with_path("/admin")]);
    let (proxy, _shutdown) =
        common::start_proxy(vec![Arc::new(firewall) as Arc<dyn ProxyPlugin>]).await;

    let denied = common::roundtrip(proxy, &get("/admin/users", backend)).await;
    let text = String::from_utf8(denied).unwrap();
    assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{text}");

    let allowed = common::roundtrip(proxy, &get("/public", backend)).await;
    let text = String::from_utf8(allowed).unwrap();
    assert!(text.ends_with("should not be seen"), "{text}");
}

#[tokio::test]
async fn connect_tunnel_relays_bytes_verbatim() {
    let echo = common::start_echo_backend().await;
    let (proxy, _shutdown) = common::start_proxy(vec![]).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(format!("CONNECT {echo} HTTP/1.1\r\nHost: {echo}\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 200 Connection Established"), "{head}");

    // Arbitrary binary payload, CRLFs and NULs included.
    let payload = b"\x00\x01binary\r\n\r\npayload\xff";
    stream.write_all(payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, payload);
}

#[tokio::test]
async fn websocket_upgrade_switches_to_byte_relay() {
    let backend = common::start_upgrade_echo_backend().await;
    let (proxy, _shutdown) = common::start_proxy(vec![]).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!(
        "GET /chat HTTP/1.1\r\nHost: {backend}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols"), "{head}");

    // Post-handshake traffic bypasses the plugins and flows verbatim.
    for payload in [&b"\x81\x05hello"[..], &b"frame\x00two"[..]] {
        stream.write_all(payload).await.unwrap();
        let mut echoed = vec![0u8; payload.len()];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, payload);
    }
}

#[tokio::test]
async fn response_plugins_chain_in_registration_order() {
    let backend = common::start_backend("hello").await;
    let (proxy, _shutdown) = common::start_proxy(vec![
        Marker::tagging("a", b"-A"),
        Marker::tagging("b", b"-B"),
    ])
    .await;

    let response = common::roundtrip(proxy, &get("/", backend)).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.ends_with("hello-A-B"), "{text}");
}

#[tokio::test]
async fn failing_response_plugin_leaves_the_body_intact() {
    let backend = common::start_backend("hello").await;
    let (proxy, _shutdown) = common::start_proxy(vec![
        Marker::failing("broken"),
        Marker::tagging("b", b"-B"),
    ])
    .await;

    let response = common::roundtrip(proxy, &get("/", backend)).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.ends_with("hello-B"), "{text}");
}

#[tokio::test]
async fn malformed_requests_are_rejected_with_400() {
    let (proxy, _shutdown) = common::start_proxy(vec![]).await;

    let response = common::roundtrip(proxy, b"NONSENSE\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");
}

#[tokio::test]
async fn unreachable_upstream_answers_502() {
    // Bind then drop to get a port nothing listens on.
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (proxy, _shutdown) = common::start_proxy(vec![]).await;

    let response = common::roundtrip(proxy, &get("/", closed)).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{text}");
}

#[tokio::test]
async fn missing_host_header_is_a_bad_request() {
    let (proxy, _shutdown) = common::start_proxy(vec![]).await;

    let response = common::roundtrip(proxy, b"GET / HTTP/1.1\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");
}

#[tokio::test]
async fn aborted_client_connections_do_not_stop_the_proxy() {
    let backend = common::start_backend("still serving").await;
    let (proxy, _shutdown) = common::start_proxy(vec![]).await;

    // Connections reset before (or right after) accept must not take the
    // accept loop down with them.
    for _ in 0..8 {
        let stream = TcpStream::connect(proxy).await.unwrap();
        stream
            .set_linger(Some(std::time::Duration::from_secs(0)))
            .unwrap();
        drop(stream);
    }

    let response = common::roundtrip(proxy, &get("/", backend)).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.ends_with("still serving"), "{text}");
}

#[tokio::test]
async fn shutdown_finalizes_plugins() {
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Finalizer {
        finalized: Arc<AtomicBool>,
    }
    impl ProxyPlugin for Finalizer {
        fn name(&self) -> &str {
            "finalizer"
        }
        fn finalize(&self) -> Result<(), PluginError> {
            self.finalized.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let finalized = Arc::new(AtomicBool::new(false));
    let (_proxy, shutdown) = common::start_proxy(vec![Arc::new(Finalizer {
        finalized: finalized.clone(),
    })])
    .await;

    shutdown.trigger();
    for _ in 0..100 {
        if finalized.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("plugins were not finalized after shutdown");
}
