//! Local bridge port selection

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rand::Rng;
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use tokio::net::UdpSocket;
use tracing::trace;

/// Ports the local bridge is drawn from
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 10000..=30000;

/// Probe budget before giving up
pub const MAX_PORT_ATTEMPTS: usize = 100;

/// Bind a UDP socket on `127.0.0.1` at a random port from `ports`
///
/// The socket found during probing is the one returned, so nothing else
/// can grab the port in between.
pub async fn bind_random_port(ports: RangeInclusive<u16>, attempts: usize) -> Result<UdpSocket> {
    let (start, end) = (*ports.start(), *ports.end());
    if start == 0 || end < start {
        return Err(Error::config_value(
            "turn_relay.port_range",
            format!("invalid port range {start}-{end}"),
        ));
    }

    for attempt in 0..attempts {
        let port = OsRng.gen_range(start..=end);
        match UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await {
            Ok(socket) => return Ok(socket),
            Err(e) => trace!(attempt, port, error = %e, "Port unavailable"),
        }
    }

    Err(Error::NoPortAvailable { start, end, attempts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_random_port() {
        let socket = bind_random_port(EPHEMERAL_PORTS, MAX_PORT_ATTEMPTS).await.unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert!(EPHEMERAL_PORTS.contains(&addr.port()));
    }

    #[tokio::test]
    async fn test_occupied_range_fails() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = bind_random_port(port..=port, 5).await.unwrap_err();
        match err {
            Error::NoPortAvailable { start, end, attempts } => {
                assert_eq!((start, end, attempts), (port, port, 5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_zero_port() {
        assert!(bind_random_port(0..=0, 1).await.is_err());
    }
}
