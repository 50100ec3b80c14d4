//! UDP discovery broadcaster.
//!
//! While a round is being hosted the server shouts its whereabouts onto the
//! LAN once per interval so student clients can find it without typing an IP
//! address.  Each datagram is a [`DiscoveryAnnouncement`] payload:
//!
//! ```text
//! ipv4=192.168.1.20;name=Exam Server;desc=Classroom exam;tcp=5050;token=none;test=Networking;
//! ```
//!
//! # How UDP broadcast works (for beginners)
//!
//! A datagram sent to `255.255.255.255` is delivered to every host on the
//! local network segment.  Routers do not forward it, which is exactly the
//! scope of a classroom.  The socket must have `SO_BROADCAST` enabled or the
//! OS refuses the send.  Delivery is not guaranteed, which is why the
//! announcement is repeated every second; clients de-duplicate by address.
//!
//! # Threading
//!
//! The loop runs on a dedicated named OS thread with a blocking socket.  It
//! sleeps between sends by waiting on a stop channel, so [`stop`] interrupts
//! it immediately instead of waiting out the interval.  `stop` never blocks
//! its caller: a short-lived reaper thread joins the worker with a timeout,
//! which keeps async callers holding locks off the join.
//!
//! [`stop`]: DiscoveryService::stop

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use proctor_core::DiscoveryAnnouncement;
use tracing::{debug, info, warn};

use crate::application::ports::{DiscoveryError, DiscoveryService};

/// How long the reaper waits for a stopped thread to finish.
const STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// Where and how often to broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Destination of every datagram.
    pub target: SocketAddr,
    /// Local address the sending socket binds to.
    pub bind_ip: Ipv4Addr,
    pub interval: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, 5051)),
            bind_ip: Ipv4Addr::UNSPECIFIED,
            interval: Duration::from_secs(1),
        }
    }
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// [`DiscoveryService`] backed by a UDP socket and a background thread.
pub struct UdpDiscoveryBroadcaster {
    config: BroadcastConfig,
    worker: Mutex<Option<Worker>>,
}

impl UdpDiscoveryBroadcaster {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            worker: Mutex::new(None),
        }
    }

    fn take_worker(&self) -> Option<Worker> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl DiscoveryService for UdpDiscoveryBroadcaster {
    fn start(&self, announcement: DiscoveryAnnouncement) -> Result<(), DiscoveryError> {
        self.stop();

        let socket = UdpSocket::bind((self.config.bind_ip, 0)).map_err(DiscoveryError::Socket)?;
        socket.set_broadcast(true).map_err(DiscoveryError::Socket)?;

        let (stop_tx, stop_rx) = mpsc::channel();
        let payload = announcement.to_payload();
        let target = self.config.target;
        let interval = self.config.interval;

        let handle = std::thread::Builder::new()
            .name("proctor-discovery".to_string())
            .spawn(move || broadcast_loop(socket, target, payload, interval, stop_rx))
            .map_err(DiscoveryError::Spawn)?;

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Worker { stop_tx, handle });
        info!(
            "broadcasting \"{}\" to {target} every {} ms",
            announcement.test_name,
            interval.as_millis()
        );
        Ok(())
    }

    fn stop(&self) {
        let Some(worker) = self.take_worker() else {
            return;
        };
        // A send error only means the thread already exited.
        let _ = worker.stop_tx.send(());
        reap(worker.handle);
    }

    fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

impl Drop for UdpDiscoveryBroadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

fn broadcast_loop(
    socket: UdpSocket,
    target: SocketAddr,
    payload: String,
    interval: Duration,
    stop_rx: mpsc::Receiver<()>,
) {
    loop {
        if let Err(e) = socket.send_to(payload.as_bytes(), target) {
            warn!("discovery broadcast to {target} failed: {e}");
        }
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("discovery broadcaster stopped");
}

/// Joins a signalled worker on its own thread so `stop` returns at once.
fn reap(handle: JoinHandle<()>) {
    if handle.is_finished() {
        let _ = handle.join();
        debug!("discovery thread joined");
        return;
    }
    let spawned = std::thread::Builder::new()
        .name("proctor-discovery-reaper".to_string())
        .spawn(move || {
            if join_with_timeout(handle, STOP_TIMEOUT) {
                debug!("discovery thread joined");
            } else {
                warn!("discovery thread did not stop within {} ms", STOP_TIMEOUT.as_millis());
            }
        });
    if let Err(e) = spawned {
        // The worker still exits on its own; it is only left unjoined.
        warn!("could not spawn discovery reaper: {e}");
    }
}

/// Joins `handle`, giving up after `timeout`.  Returns whether it joined.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    handle.join().is_ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
