//! Per-connection driver: one reader loop and one writer task per socket.
//!
//! ```text
//!            ┌──────────── reader loop ─────────────┐
//! socket ──► │ read_message ─► SessionHandler::handle│
//!            └───────────────────────────────────────┘
//!                                  │ replies / broadcasts
//!                                  ▼
//!                 SessionLink (unbounded queue of Outgoing)
//!                                  │
//!            ┌──────────── writer task ─────────────┐
//! socket ◄── │ write_message ◄─ Outgoing::Message   │
//!            │ shutdown      ◄─ Outgoing::Close     │
//!            └───────────────────────────────────────┘
//! ```
//!
//! The reader stops on EOF, on a protocol or I/O error, or as soon as the
//! link is closed from elsewhere (the dashboard ending the run, time expiry,
//! shutdown).  The writer stops at the close marker, so nothing queued after
//! it reaches the client.

use std::net::SocketAddr;
use std::sync::Arc;

use proctor_core::{read_message, write_message};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::dashboard::Dashboard;
use crate::application::session::{Outgoing, SessionHandler, SessionLink};

/// Serves one accepted TCP connection until it ends.
pub async fn serve_connection(stream: TcpStream, peer: SocketAddr, dashboard: Arc<Dashboard>) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("could not set TCP_NODELAY for {peer}: {e}");
    }
    let (read_half, write_half) = stream.into_split();
    drive_connection(read_half, write_half, peer, dashboard).await;
}

/// Runs the session protocol over any byte stream pair.
///
/// Returns once the session is closed and everything queued before the close
/// marker has been written.
pub async fn drive_connection<R, W>(reader: R, writer: W, peer: SocketAddr, dashboard: Arc<Dashboard>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (link, outbound) = SessionLink::channel();
    let writer_task = tokio::spawn(write_loop(writer, outbound, link.clone(), peer));

    let mut handler = SessionHandler::attach(dashboard, link.clone(), peer).await;
    let mut reader = BufReader::new(reader);

    loop {
        let frame = tokio::select! {
            _ = link.closed() => break,
            frame = read_message(&mut reader) => frame,
        };
        match frame {
            Ok(Some(message)) => handler.handle(message).await,
            Ok(None) => {
                debug!("{peer} closed the connection");
                break;
            }
            Err(e) => {
                warn!("dropping connection from {peer}: {e}");
                break;
            }
        }
    }

    handler.close().await;
    if let Err(e) = writer_task.await {
        warn!("writer task for {peer} failed: {e}");
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    link: SessionLink,
    peer: SocketAddr,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outgoing::Message(message) => {
                if let Err(e) = write_message(&mut writer, &message).await {
                    warn!("write to {peer} failed: {e}");
                    link.close();
                    break;
                }
            }
            Outgoing::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}
