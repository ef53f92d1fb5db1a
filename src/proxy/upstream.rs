//! Upstream connection handling: ordinary forwarding, CONNECT tunnels,
//! and WebSocket upgrades.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::http::codec::{self, CodecError, CodecLimits};
use crate::http::{HttpRequest, HttpResponse};
use crate::plugin::Pipeline;
use crate::proxy::relay;

/// Response heads larger than this are treated as a gateway failure.
const MAX_RESPONSE_HEAD_BYTES: usize = 64 * 1024;

/// Split `host:port` authority text, honoring bracketed IPv6 literals.
///
/// `default_port` fills in when no port is present; `None` makes the port
/// mandatory (CONNECT targets always carry one).
pub(crate) fn parse_authority(authority: &str, default_port: Option<u16>) -> Option<(String, u16)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return match tail.strip_prefix(':') {
            Some(port) => Some((host.to_string(), port.parse().ok()?)),
            None if tail.is_empty() => Some((host.to_string(), default_port?)),
            _ => None,
        };
    }
    match authority.rsplit_once(':') {
        // A second colon means an unbracketed IPv6 literal, not host:port.
        Some((host, _)) if host.contains(':') => Some((authority.to_string(), default_port?)),
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((authority.to_string(), default_port?)),
    }
}

async fn connect(host: &str, port: u16, connect_timeout: Duration) -> io::Result<TcpStream> {
    match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "upstream connect timed out",
        )),
    }
}

/// Serve a CONNECT request: open the tunnel target, confirm to the client,
/// then relay opaquely until both sides close.
///
/// `client_reader` keeps the buffered read side so bytes the client sent
/// right behind its CONNECT are not lost.
pub(crate) async fn run_connect<R, W>(
    request: &HttpRequest,
    client_reader: R,
    mut client_writer: W,
    connect_timeout: Duration,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some((host, port)) = parse_authority(&request.target, None) else {
        tracing::debug!(client_addr = %request.client, target = %request.target, "bad tunnel target");
        client_writer
            .write_all(&HttpResponse::bad_request().to_bytes())
            .await?;
        return client_writer.shutdown().await;
    };

    let upstream = match connect(&host, port, connect_timeout).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(host = %host, port, error = %err, "tunnel target unreachable");
            client_writer
                .write_all(&HttpResponse::bad_gateway().to_bytes())
                .await?;
            return client_writer.shutdown().await;
        }
    };

    client_writer
        .write_all(&HttpResponse::connection_established().to_bytes())
        .await?;
    tracing::debug!(client_addr = %request.client, host = %host, port, "tunnel established");

    let (upstream_read, upstream_write) = upstream.into_split();
    let (up, down) =
        relay::relay_bidirectional(client_reader, client_writer, upstream_read, upstream_write)
            .await;
    tracing::debug!(
        client_addr = %request.client,
        host = %host,
        port,
        bytes_up = up,
        bytes_down = down,
        "tunnel closed"
    );
    Ok(())
}

/// Serve an ordinary request: forward it upstream, collect the response,
/// run it through the response pipeline, and answer the client.
///
/// An upstream `101 Switching Protocols` with a WebSocket upgrade turns the
/// exchange into an opaque relay instead.
pub(crate) async fn run_exchange<R, W>(
    request: &HttpRequest,
    client_reader: R,
    mut client_writer: W,
    pipeline: &Pipeline,
    connect_timeout: Duration,
    limits: CodecLimits,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some((host, port)) = upstream_target(request) else {
        tracing::debug!(client_addr = %request.client, target = %request.target, "no usable upstream target");
        client_writer
            .write_all(&HttpResponse::bad_request().to_bytes())
            .await?;
        return client_writer.shutdown().await;
    };

    let upstream = match connect(&host, port, connect_timeout).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(host = %host, port, error = %err, "upstream unreachable");
            client_writer
                .write_all(&HttpResponse::bad_gateway().to_bytes())
                .await?;
            return client_writer.shutdown().await;
        }
    };

    let (upstream_read, mut upstream_write) = upstream.into_split();
    let mut upstream_reader = BufReader::new(upstream_read);

    upstream_write.write_all(&serialize_request(request)).await?;

    let head = match codec::read_response_head(&mut upstream_reader, MAX_RESPONSE_HEAD_BYTES).await
    {
        Ok(head) => head,
        Err(err) => {
            tracing::warn!(host = %host, port, error = %err, "unreadable upstream response");
            client_writer
                .write_all(&HttpResponse::bad_gateway().to_bytes())
                .await?;
            return client_writer.shutdown().await;
        }
    };

    if is_websocket_switch(&head) {
        // The handshake response is still an ordinary response to the
        // plugins; only the frames that follow bypass them.
        let head = pipeline.process_response(head, request);
        client_writer.write_all(&head).await?;
        tracing::debug!(client_addr = %request.client, host = %host, port, "websocket upgrade accepted; relaying");
        relay::relay_bidirectional(client_reader, client_writer, upstream_reader, upstream_write)
            .await;
        return Ok(());
    }

    let mut response = head.clone();
    if let Err(err) =
        read_response_body(&mut upstream_reader, &head, &mut response, limits.max_response_bytes)
            .await
    {
        tracing::warn!(host = %host, port, error = %err, "failed to read upstream response body");
        client_writer
            .write_all(&HttpResponse::bad_gateway().to_bytes())
            .await?;
        return client_writer.shutdown().await;
    }

    let response = pipeline.process_response(response, request);
    client_writer.write_all(&response).await?;
    client_writer.shutdown().await
}

/// Resolve the upstream host and port from the request target or the Host
/// header. An absolute-form target defaults to its scheme's port; a bare
/// Host header defaults to 80.
fn upstream_target(request: &HttpRequest) -> Option<(String, u16)> {
    for (scheme, default_port) in [("http://", 80), ("https://", 443)] {
        if let Some(rest) = request.target.strip_prefix(scheme) {
            let authority = rest.split('/').next().unwrap_or(rest);
            return parse_authority(authority, Some(default_port));
        }
    }
    parse_authority(request.header("host")?, Some(80))
}

/// Serialize a request for the upstream: origin-form target, headers
/// verbatim in order, and the body re-framed as needed.
fn serialize_request(request: &HttpRequest) -> Vec<u8> {
    let chunked = codec::is_chunked(&request.headers);
    let mut out = Vec::with_capacity(256 + request.body.len());
    out.extend_from_slice(
        format!("{} {} {}\r\n", request.method, request.path(), request.version).as_bytes(),
    );
    for (name, value) in request.headers.iter() {
        // A Content-Length alongside chunked framing was ignored at parse
        // time (RFC 7230 §3.3.3); forwarding it would desynchronize the
        // upstream.
        if chunked && name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");

    if chunked {
        // The body was decoded at parse time; re-frame it as one chunk so
        // the declared Transfer-Encoding stays truthful.
        if !request.body.is_empty() {
            out.extend_from_slice(format!("{:x}\r\n", request.body.len()).as_bytes());
            out.extend_from_slice(&request.body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
    } else {
        out.extend_from_slice(&request.body);
    }
    out
}

/// True if a verbatim response head announces a WebSocket protocol switch.
fn is_websocket_switch(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    let Some(status_line) = text.lines().next() else {
        return false;
    };
    status_line.contains(" 101") && text.contains("upgrade: websocket")
}

/// Append the response body to `out`, choosing the framing the head
/// declares: chunked (kept verbatim), Content-Length, or read-to-close.
/// Bodies larger than `max_body` fail instead of buffering unbounded.
async fn read_response_body<R>(
    reader: &mut R,
    head: &[u8],
    out: &mut Vec<u8>,
    max_body: usize,
) -> Result<(), CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();

    if header_value(&text, "transfer-encoding")
        .map(|v| v.contains("chunked"))
        .unwrap_or(false)
    {
        return codec::read_chunked_raw(reader, out, max_body).await;
    }

    if let Some(length) = header_value(&text, "content-length").and_then(|v| v.trim().parse::<usize>().ok())
    {
        if length > max_body {
            return Err(CodecError::BodyTooLarge(max_body));
        }
        let start = out.len();
        out.resize(start + length, 0);
        reader.read_exact(&mut out[start..]).await?;
        return Ok(());
    }

    // No framing declared: the body runs until the upstream closes.
    let start = out.len();
    reader.take(max_body as u64 + 1).read_to_end(out).await?;
    if out.len() - start > max_body {
        return Err(CodecError::BodyTooLarge(max_body));
    }
    Ok(())
}

/// Value of `name` in an already-lowercased head, or `None`.
fn header_value<'a>(head_lower: &'a str, name: &str) -> Option<&'a str> {
    head_lower
        .lines()
        .skip(1)
        .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HeaderMap;

    fn request(method: &str, target: &str, headers: &[(&str, &str)], body: &[u8]) -> HttpRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.push(*name, *value);
        }
        HttpRequest {
            method: method.into(),
            target: target.into(),
            version: "HTTP/1.1".into(),
            headers: map,
            body: body.to_vec(),
            client: "127.0.0.1:5000".parse().unwrap(),
        }
    }

    #[test]
    fn authority_parsing_handles_ports_and_ipv6() {
        assert_eq!(parse_authority("example.com:443", None), Some(("example.com".into(), 443)));
        assert_eq!(parse_authority("example.com", Some(80)), Some(("example.com".into(), 80)));
        assert_eq!(parse_authority("example.com", None), None);
        assert_eq!(parse_authority("[::1]:8443", None), Some(("::1".into(), 8443)));
        assert_eq!(parse_authority("[::1]", Some(80)), Some(("::1".into(), 80)));
        assert_eq!(parse_authority("::1", Some(80)), Some(("::1".into(), 80)));
        assert_eq!(parse_authority("host:notaport", None), None);
    }

    #[test]
    fn upstream_target_prefers_absolute_uri_over_host_header() {
        let req = request(
            "GET",
            "http://target.example:8080/path",
            &[("Host", "other.example")],
            b"",
        );
        assert_eq!(upstream_target(&req), Some(("target.example".into(), 8080)));
    }

    #[test]
    fn upstream_target_falls_back_to_host_header() {
        let req = request("GET", "/path", &[("Host", "backend.example")], b"");
        assert_eq!(upstream_target(&req), Some(("backend.example".into(), 80)));

        let bare = request("GET", "/path", &[], b"");
        assert_eq!(upstream_target(&bare), None);
    }

    #[test]
    fn absolute_form_defaults_to_the_scheme_port() {
        let http = request("GET", "http://plain.example/x", &[], b"");
        assert_eq!(upstream_target(&http), Some(("plain.example".into(), 80)));

        let https = request("GET", "https://secure.example/x", &[], b"");
        assert_eq!(upstream_target(&https), Some(("secure.example".into(), 443)));

        let explicit = request("GET", "https://secure.example:8443/x", &[], b"");
        assert_eq!(upstream_target(&explicit), Some(("secure.example".into(), 8443)));
    }

    #[test]
    fn serialized_request_uses_origin_form_and_keeps_headers() {
        let req = request(
            "POST",
            "http://backend.example/submit",
            &[("Host", "backend.example"), ("Content-Length", "5")],
            b"hello",
        );
        let wire = String::from_utf8(serialize_request(&req)).unwrap();
        assert!(wire.starts_with("POST /submit HTTP/1.1\r\n"));
        assert!(wire.contains("Host: backend.example\r\n"));
        assert!(wire.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn chunked_request_body_is_reframed() {
        let req = request(
            "POST",
            "/up",
            &[("Host", "x"), ("Transfer-Encoding", "chunked")],
            b"payload",
        );
        let wire = String::from_utf8(serialize_request(&req)).unwrap();
        assert!(wire.ends_with("\r\n\r\n7\r\npayload\r\n0\r\n\r\n"));

        let empty = request("POST", "/up", &[("Transfer-Encoding", "chunked")], b"");
        let wire = String::from_utf8(serialize_request(&empty)).unwrap();
        assert!(wire.ends_with("\r\n\r\n0\r\n\r\n"));
    }

    #[test]
    fn stale_content_length_is_dropped_when_reframing_chunked() {
        let req = request(
            "POST",
            "/up",
            &[
                ("Host", "x"),
                ("Content-Length", "9999"),
                ("Transfer-Encoding", "chunked"),
            ],
            b"payload",
        );
        let wire = String::from_utf8(serialize_request(&req)).unwrap();
        assert!(!wire.to_ascii_lowercase().contains("content-length"), "{wire}");
        assert!(wire.contains("Transfer-Encoding: chunked\r\n"));
        assert!(wire.ends_with("7\r\npayload\r\n0\r\n\r\n"));
    }

    #[test]
    fn websocket_switch_detection() {
        assert!(is_websocket_switch(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n"
        ));
        assert!(!is_websocket_switch(b"HTTP/1.1 200 OK\r\n\r\n"));
        assert!(!is_websocket_switch(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: h2c\r\n\r\n"
        ));
    }

    #[tokio::test]
    async fn response_body_by_content_length() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n";
        let mut reader = BufReader::new(std::io::Cursor::new(b"bodyextra".to_vec()));
        let mut out = head.to_vec();
        read_response_body(&mut reader, head, &mut out, 1024).await.unwrap();
        assert_eq!(&out[head.len()..], b"body");
    }

    #[tokio::test]
    async fn response_body_without_framing_reads_to_close() {
        let head = b"HTTP/1.1 200 OK\r\n\r\n";
        let mut reader = BufReader::new(std::io::Cursor::new(b"everything until eof".to_vec()));
        let mut out = head.to_vec();
        read_response_body(&mut reader, head, &mut out, 1024).await.unwrap();
        assert_eq!(&out[head.len()..], b"everything until eof");
    }

    #[tokio::test]
    async fn chunked_response_body_keeps_framing() {
        let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut reader = BufReader::new(std::io::Cursor::new(b"3\r\nabc\r\n0\r\n\r\n".to_vec()));
        let mut out = head.to_vec();
        read_response_body(&mut reader, head, &mut out, 1024).await.unwrap();
        assert_eq!(&out[head.len()..], b"3\r\nabc\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn oversized_declared_response_is_rejected() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n";
        let mut reader = BufReader::new(std::io::Cursor::new(vec![0u8; 100]));
        let mut out = head.to_vec();
        let err = read_response_body(&mut reader, head, &mut out, 10).await.unwrap_err();
        assert!(matches!(err, CodecError::BodyTooLarge(10)));
    }

    #[tokio::test]
    async fn oversized_unframed_response_is_rejected() {
        let head = b"HTTP/1.1 200 OK\r\n\r\n";
        let mut reader = BufReader::new(std::io::Cursor::new(vec![b'x'; 32]));
        let mut out = head.to_vec();
        let err = read_response_body(&mut reader, head, &mut out, 10).await.unwrap_err();
        assert!(matches!(err, CodecError::BodyTooLarge(10)));
    }
}
