use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::{StompCodec, StompItem};
use crate::connection::{CloseReason, Outbound, ServerConnection};
use crate::error::{Result, StompError};
use crate::frame::Frame;
use crate::handler::ServerHandler;

/// How long a closed connection may spend flushing before its transport is
/// dropped.
pub const WRITER_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Drive one client connection over `io` until it closes.
///
/// Works with any byte transport: a `TcpStream`, a TLS stream, or an
/// in-memory `tokio::io::duplex` pipe.
pub async fn serve<T>(io: T, handler: Arc<ServerHandler>, peer: Option<SocketAddr>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    serve_with_shutdown(io, handler, peer, CancellationToken::new()).await
}

/// Like [`serve`], closing the connection when `shutdown` is cancelled.
pub async fn serve_with_shutdown<T>(
    io: T,
    handler: Arc<ServerHandler>,
    peer: Option<SocketAddr>,
    shutdown: CancellationToken,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (conn, outbound) =
        ServerConnection::channel_with_token(handler, peer, shutdown.child_token());
    run(io, conn, outbound).await
}

async fn run<T>(
    io: T,
    conn: ServerConnection,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let options = conn.handler().options();
    let codec = StompCodec::with_limits(options.frame_limits()).trailing_line(options.trailing_line);
    let (mut sink, mut stream) = Framed::new(io, codec).split();
    tracing::debug!(connection = conn.id(), peer = ?conn.peer(), "connection accepted");

    // single writer: the only task that touches the sink
    let writer_conn = conn.clone();
    let writer = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Item(item) => {
                    if let Err(e) = sink.send(item).await {
                        tracing::debug!(connection = writer_conn.id(), error = %e, "write failed");
                        break;
                    }
                    writer_conn.touch_outbound();
                }
                Outbound::Close => break,
            }
        }
        let _ = sink.close().await;
        writer_conn.close(CloseReason::Transport);
    });

    let closed = conn.cancellation_token();
    let result = loop {
        tokio::select! {
            _ = closed.cancelled() => {
                // still open only when the server token was cancelled
                conn.close(CloseReason::Shutdown);
                break Ok(());
            }
            item = stream.next() => match item {
                Some(Ok(StompItem::Heartbeat)) => conn.touch_inbound(),
                Some(Ok(StompItem::Frame(frame))) => {
                    conn.touch_inbound();
                    conn.handler().handle(frame, &conn).await;
                }
                Some(Err(StompError::Io(e))) => {
                    tracing::debug!(connection = conn.id(), error = %e, "transport error");
                    conn.close(CloseReason::Transport);
                    break Err(StompError::Io(e));
                }
                Some(Err(e)) => {
                    conn.write(Frame::error("Invalid frame received", e.to_string()));
                    conn.close(CloseReason::Protocol(e.to_string()));
                    break Err(e);
                }
                None => {
                    conn.close(CloseReason::Transport);
                    break Ok(());
                }
            },
        }
    };

    // a peer that stopped reading can block the writer forever
    let mut writer = writer;
    match tokio::time::timeout(WRITER_CLOSE_GRACE, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(connection = conn.id(), error = %e, "writer task ended abnormally");
        }
        Err(_) => {
            tracing::warn!(
                connection = conn.id(),
                grace_ms = WRITER_CLOSE_GRACE.as_millis() as u64,
                "writer stalled after close, dropping transport"
            );
            writer.abort();
        }
    }
    result
}
