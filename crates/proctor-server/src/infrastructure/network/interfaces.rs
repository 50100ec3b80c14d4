//! Local IPv4 address selection.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::{debug, warn};

use crate::infrastructure::network::acceptor::NetworkError;

/// Returns the IPv4 address of the interface that carries the default route.
///
/// Works by "connecting" an unbound UDP socket to a public address and reading
/// back the local address the OS picked.  No packet is sent.
pub fn detect_lan_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        other => {
            debug!("route lookup picked {other}, not a LAN address");
            None
        }
    }
}

/// Resolves the `bind_address` setting.
///
/// `"auto"` (or an empty value) means the detected LAN address, falling back
/// to loopback with a warning when the machine has no network.
///
/// # Errors
///
/// Returns [`NetworkError::InvalidAddress`] for anything that is not `auto`
/// or an IPv4 literal.
pub fn resolve_bind_address(setting: &str) -> Result<Ipv4Addr, NetworkError> {
    let setting = setting.trim();
    if setting.is_empty() || setting.eq_ignore_ascii_case("auto") {
        return Ok(detect_lan_ipv4().unwrap_or_else(|| {
            warn!("no LAN IPv4 address found, serving on loopback only");
            Ipv4Addr::LOCALHOST
        }));
    }
    setting
        .parse()
        .map_err(|_| NetworkError::InvalidAddress(setting.to_string()))
}

/// Socket address the TCP listener binds: the resolved address itself, so
/// students only reach the server on the interface it advertises.
pub fn listen_address(resolved: Ipv4Addr, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(resolved), port)
}
