//! Direct-connect relay policy and dialing.
//!
//! `direct-tcpip` channels let a client reach a destination through the
//! gateway. Policy: only loopback and private destinations may be dialed;
//! the reserved diagnostic port routes to the diagnostic sink instead of a
//! network dial; everything else is refused.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Whether the relay policy allows dialing `addr`.
///
/// Hostnames that do not parse as IP addresses are refused outright; the
/// gateway does not resolve names on behalf of clients.
pub fn relay_permitted(addr: &str) -> bool {
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4_permitted(v4),
        Ok(IpAddr::V6(v6)) => v6_permitted(v6),
        Err(_) => addr == "localhost",
    }
}

fn v4_permitted(addr: Ipv4Addr) -> bool {
    addr.is_loopback() || addr.is_private() || addr.is_link_local()
}

fn v6_permitted(addr: Ipv6Addr) -> bool {
    // Unique-local fc00::/7 plus loopback.
    addr.is_loopback() || (addr.segments()[0] & 0xfe00) == 0xfc00
}

/// Dial a permitted relay destination.
pub async fn dial(addr: &str, port: u16) -> std::io::Result<TcpStream> {
    debug!(%addr, port, "direct relay dial");
    match TcpStream::connect((addr, port)).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            warn!(%addr, port, "relay dial failed: {e}");
            Err(e)
        }
    }
}
