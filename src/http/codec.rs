//! Request parsing and response framing primitives.
//!
//! # Responsibilities
//! - Parse the request line and headers from a buffered byte stream
//! - Read the body per Content-Length or chunked framing (absence of a
//!   recognized mechanism means no body)
//! - Read an upstream response head verbatim for relaying
//! - Enforce header/body size limits before buffering
//!
//! # Design Decisions
//! - Chunked request bodies are decoded here; the forwarding path
//!   re-frames them (plugins always see plain body bytes)
//! - Upstream chunked responses are captured verbatim, framing included,
//!   because the response pipeline operates on raw wire bytes

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::http::request::{HeaderMap, HttpRequest};

/// Size limits applied while parsing.
#[derive(Debug, Clone, Copy)]
pub struct CodecLimits {
    /// Maximum size of the header section (request line included).
    pub max_header_bytes: usize,
    /// Maximum size of a decoded request body.
    pub max_body_bytes: usize,
    /// Maximum size of a buffered upstream response body.
    pub max_response_bytes: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            max_body_bytes: 2 * 1024 * 1024,
            max_response_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Error type for wire parsing.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The peer closed the stream before a complete message arrived.
    #[error("connection closed before a complete message was received")]
    UnexpectedEof,

    #[error("malformed request line: {0:?}")]
    RequestLine(String),

    #[error("malformed header line: {0:?}")]
    HeaderLine(String),

    #[error("invalid Content-Length value: {0:?}")]
    ContentLength(String),

    #[error("invalid chunk size line: {0:?}")]
    ChunkSize(String),

    #[error("header section exceeds {0} bytes")]
    HeadersTooLarge(usize),

    #[error("body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse one HTTP/1.1 request from `reader`.
///
/// `client` is the socket-layer peer address recorded on the request; it is
/// never derived from headers.
pub async fn read_request<R>(
    reader: &mut R,
    client: SocketAddr,
    limits: &CodecLimits,
) -> Result<HttpRequest, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = limits.max_header_bytes;

    let request_line = read_line(reader, &mut budget, limits.max_header_bytes).await?;
    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
    {
        (Some(m), Some(t), Some(v), None) => (m.to_string(), t.to_string(), v.to_string()),
        _ => return Err(CodecError::RequestLine(request_line)),
    };

    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(reader, &mut budget, limits.max_header_bytes).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::HeaderLine(line.clone()))?;
        headers.push(name.trim(), value.trim());
    }

    let body = read_request_body(reader, &headers, limits).await?;

    Ok(HttpRequest {
        method,
        target,
        version,
        headers,
        body,
        client,
    })
}

/// Read the body declared by `headers`, or nothing when no recognized
/// length mechanism is present.
async fn read_request_body<R>(
    reader: &mut R,
    headers: &HeaderMap,
    limits: &CodecLimits,
) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    // Chunked takes precedence when both mechanisms are declared
    // (RFC 7230 §3.3.3).
    if is_chunked(headers) {
        return read_chunked_decoded(reader, limits.max_body_bytes).await;
    }

    if let Some(value) = headers.get("content-length") {
        let length: usize = value
            .trim()
            .parse()
            .map_err(|_| CodecError::ContentLength(value.to_string()))?;
        if length > limits.max_body_bytes {
            return Err(CodecError::BodyTooLarge(limits.max_body_bytes));
        }
        let mut body = vec![0u8; length];
        reader
            .read_exact(&mut body)
            .await
            .map_err(map_body_eof)?;
        return Ok(body);
    }

    Ok(Vec::new())
}

/// True if the header set declares chunked transfer encoding.
pub(crate) fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get("transfer-encoding")
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false)
}

/// Decode a chunked body into plain bytes. Trailers are consumed and
/// discarded.
async fn read_chunked_decoded<R>(reader: &mut R, max_body: usize) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let size_line = read_raw_line(reader).await?;
        let size = parse_chunk_size(&size_line)?;
        if size == 0 {
            // Trailer section ends at the empty line.
            loop {
                let trailer = read_raw_line(reader).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        if body.len() + size > max_body {
            return Err(CodecError::BodyTooLarge(max_body));
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(map_body_eof)?;
        // Chunk data is followed by CRLF.
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await.map_err(map_body_eof)?;
    }
}

/// Read an upstream response's header section verbatim, terminator
/// included, without interpreting it beyond finding the blank line.
pub async fn read_response_head<R>(reader: &mut R, max_bytes: usize) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        let start = head.len();
        let read = reader.read_until(b'\n', &mut head).await?;
        if read == 0 {
            return Err(CodecError::UnexpectedEof);
        }
        if head.len() > max_bytes {
            return Err(CodecError::HeadersTooLarge(max_bytes));
        }
        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            // Blank line only counts once the status line has been read.
            if start > 0 {
                return Ok(head);
            }
            head.clear();
        }
    }
}

/// Capture a chunked stream verbatim, framing and trailers included,
/// appending to `out`. The `max_bytes` cap is checked between chunks, so
/// a stream can overshoot it by at most one chunk before failing. Used
/// for relaying upstream chunked responses.
pub async fn read_chunked_raw<R>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<(), CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let base = out.len();
    loop {
        if out.len() - base > max_bytes {
            return Err(CodecError::BodyTooLarge(max_bytes));
        }
        let start = out.len();
        if reader.read_until(b'\n', out).await? == 0 {
            return Err(CodecError::UnexpectedEof);
        }
        let size = parse_chunk_size(&String::from_utf8_lossy(trim_crlf(&out[start..])))?;
        if size == 0 {
            // Copy trailers through to the blank line.
            loop {
                let t = out.len();
                if reader.read_until(b'\n', out).await? == 0 {
                    return Err(CodecError::UnexpectedEof);
                }
                if trim_crlf(&out[t..]).is_empty() {
                    return Ok(());
                }
            }
        }
        let data_start = out.len();
        out.resize(data_start + size + 2, 0);
        reader
            .read_exact(&mut out[data_start..])
            .await
            .map_err(map_body_eof)?;
    }
}

fn parse_chunk_size(line: &str) -> Result<usize, CodecError> {
    // Chunk extensions after ';' are permitted and ignored.
    let digits = line.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(digits, 16).map_err(|_| CodecError::ChunkSize(line.to_string()))
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Read one header-section line, enforcing the shared size budget.
async fn read_line<R>(
    reader: &mut R,
    budget: &mut usize,
    limit: usize,
) -> Result<String, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let read = reader.read_until(b'\n', &mut raw).await?;
    if read == 0 {
        return Err(CodecError::UnexpectedEof);
    }
    if read > *budget {
        return Err(CodecError::HeadersTooLarge(limit));
    }
    *budget -= read;
    Ok(String::from_utf8_lossy(trim_crlf(&raw)).into_owned())
}

/// Read one line with no budget accounting (chunk framing lines).
async fn read_raw_line<R>(reader: &mut R) -> Result<String, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    if reader.read_until(b'\n', &mut raw).await? == 0 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(String::from_utf8_lossy(trim_crlf(&raw)).into_owned())
}

fn map_body_eof(err: std::io::Error) -> CodecError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        CodecError::UnexpectedEof
    } else {
        CodecError::Io(err)
    }
}
