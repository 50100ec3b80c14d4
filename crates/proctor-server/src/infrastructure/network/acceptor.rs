//! TCP accept loop.
//!
//! The acceptor owns the listening socket.  Each accepted connection is handed
//! to its own tokio task ([`serve_connection`]) so a slow or silent client can
//! never delay the next `accept()`.
//!
//! # Stopping
//!
//! `accept()` is polled with a 200 ms timeout so the loop notices a cleared
//! `running` flag promptly even when nobody is connecting.  When the loop
//! returns, the listener is dropped and the port is released.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{error, info};

use crate::application::dashboard::Dashboard;
use crate::infrastructure::network::connection::serve_connection;

/// How long one `accept()` may block before the `running` flag is checked.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Error type for network setup.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The TCP listener could not be bound.
    #[error("failed to bind TCP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The configured bind address is neither `auto` nor an IPv4 address.
    #[error("invalid bind address {0:?}: expected \"auto\" or an IPv4 address")]
    InvalidAddress(String),
}

/// Listens for student connections.
pub struct TcpAcceptor {
    listener: TcpListener,
    dashboard: Arc<Dashboard>,
    running: Arc<AtomicBool>,
}

impl TcpAcceptor {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Bind`] if the address is in use or not local.
    pub async fn bind(
        addr: SocketAddr,
        dashboard: Arc<Dashboard>,
        running: Arc<AtomicBool>,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind { addr, source })?;
        Ok(Self {
            listener,
            dashboard,
            running,
        })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `running` is cleared.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("accepting student connections on {addr}"),
            Err(e) => info!("accepting student connections (address unknown: {e})"),
        }

        while self.running.load(Ordering::Relaxed) {
            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    info!("new connection from {peer}");
                    let dashboard = Arc::clone(&self.dashboard);
                    tokio::spawn(async move {
                        serve_connection(stream, peer, dashboard).await;
                    });
                }
                Ok(Err(e)) => {
                    // Transient (e.g. out of file descriptors); keep accepting.
                    error!("accept error: {e}");
                }
                Err(_) => {}
            }
        }

        info!("accept loop stopped, listener released");
    }
}
