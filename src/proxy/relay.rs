//! Opaque bidirectional relay.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Copy bytes verbatim in both directions until each side closes.
///
/// The two directions run concurrently with bounded transfer buffers and
/// no framing knowledge. When one direction sees end-of-stream (or an
/// error), the opposite write side is shut down so the peer can drain
/// remaining in-flight bytes; the session ends when both directions have
/// finished. Returns bytes copied (client→upstream, upstream→client).
pub async fn relay_bidirectional<CR, CW, UR, UW>(
    mut client_read: CR,
    mut client_write: CW,
    mut upstream_read: UR,
    mut upstream_write: UW,
) -> (u64, u64)
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    UR: AsyncRead + Unpin,
    UW: AsyncWrite + Unpin,
{
    let up = async {
        let copied = tokio::io::copy(&mut client_read, &mut upstream_write)
            .await
            .unwrap_or(0);
        let _ = upstream_write.shutdown().await;
        copied
    };
    let down = async {
        let copied = tokio::io::copy(&mut upstream_read, &mut client_write)
            .await
            .unwrap_or(0);
        let _ = client_write.shutdown().await;
        copied
    };
    tokio::join!(up, down)
}
