//! Per-connection request handling.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::http::codec::{self, CodecError, CodecLimits};
use crate::http::HttpResponse;
use crate::plugin::Pipeline;
use crate::proxy::upstream;

/// Serve one accepted connection: parse a single request, consult the
/// pipeline, then forward, tunnel, or reject. The connection always closes
/// when this returns.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    pipeline: Arc<Pipeline>,
    limits: CodecLimits,
    connect_timeout: Duration,
) -> io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    let request = match codec::read_request(&mut reader, peer, &limits).await {
        Ok(request) => request,
        // Nothing arrived, or the client went away mid-request.
        Err(CodecError::UnexpectedEof) => return Ok(()),
        Err(err) => {
            tracing::debug!(peer_addr = %peer, error = %err, "rejecting malformed request");
            writer
                .write_all(&HttpResponse::bad_request().to_bytes())
                .await?;
            return writer.shutdown().await;
        }
    };

    tracing::debug!(
        peer_addr = %peer,
        method = %request.method,
        target = %request.target,
        "request received"
    );

    if !pipeline.process_request(&request) {
        tracing::info!(
            peer_addr = %peer,
            method = %request.method,
            target = %request.target,
            "request denied"
        );
        writer
            .write_all(&HttpResponse::forbidden().to_bytes())
            .await?;
        return writer.shutdown().await;
    }

    if request.method.eq_ignore_ascii_case("CONNECT") {
        upstream::run_connect(&request, reader, writer, connect_timeout).await
    } else {
        upstream::run_exchange(&request, reader, writer, &pipeline, connect_timeout, limits).await
    }
}
