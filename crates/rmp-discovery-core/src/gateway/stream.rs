//! Per-connection loop for stream transports.
//!
//! Reads are bounded by a short poll timeout so the loop notices shutdown.
//! Bytes are reframed into messages by [`FrameDecoder`], which keeps any
//! partial trailing message until the next read.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::protocol::{codec, FrameDecoder, ProtocolHandler};

/// Bytes requested per read.
pub const READ_CHUNK: usize = 1024;

/// Serve one connection until the peer closes it, a transport error occurs,
/// or shutdown is signalled.
pub async fn serve_connection<S>(
    mut stream: S,
    peer: String,
    handler: ProtocolHandler,
    shutdown: watch::Receiver<bool>,
    poll: Duration,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];
    info!(%peer, "connection opened");

    loop {
        while let Some(frame) = decoder.next_frame() {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(%peer, error = %e, "skipping malformed input");
                    continue;
                }
            };

            let Some(reply) = handler.handle(msg).await else {
                continue;
            };
            match codec::encode(&reply) {
                Ok(bytes) => {
                    stream.write_all(&bytes).await?;
                    stream.flush().await?;
                }
                Err(e) => error!(%peer, error = %e, "failed to encode reply"),
            }
        }

        if *shutdown.borrow() {
            debug!(%peer, "closing connection on shutdown");
            break;
        }

        let len = match timeout(poll, stream.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                info!(%peer, "connection closed by peer");
                break;
            }
            Ok(Ok(len)) => len,
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                continue
            }
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionReset => {
                info!(%peer, "connection reset by peer");
                break;
            }
            Ok(Err(e)) => return Err(e),
        };

        debug!(%peer, len, "read");
        decoder.extend(&buf[..len]);
    }

    if let Err(e) = stream.shutdown().await {
        debug!(%peer, error = %e, "stream shutdown failed");
    }
    Ok(())
}
