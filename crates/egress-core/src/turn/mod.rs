//! TURN relay bridge
//!
//! Lets a UDP peer be reached through a TURN allocation by pointing the
//! outbound at `127.0.0.1:<bridge port>` instead of the real server.

mod client;
mod forwarder;
mod port;

pub use client::TurnRelay;
pub use forwarder::{RelayConn, RelayForwarder};
pub use port::{bind_random_port, EPHEMERAL_PORTS, MAX_PORT_ATTEMPTS};

pub(crate) use client::resolve;

use crate::error::Result;
use crate::options::{ServerOptions, TurnRelayOptions};
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Allocate a relay for `target` and start the local bridge
///
/// Returns the rewritten server (`127.0.0.1:<port>`) and the running
/// forwarder, which the caller owns for the outbound's lifetime.
#[instrument(skip_all, fields(target = %target.address(), turn = %relay.server.address()))]
pub async fn apply_turn_relay(
    target: &ServerOptions,
    relay: &TurnRelayOptions,
) -> Result<(ServerOptions, RelayForwarder)> {
    let target_addr = resolve(&target.address()).await?;
    let turn = TurnRelay::allocate(relay).await?;

    let relayed = turn.relayed_addr();
    let forwarder = bridge_relay(Arc::new(turn), target_addr, EPHEMERAL_PORTS, MAX_PORT_ATTEMPTS).await?;
    let rewritten = ServerOptions::new("127.0.0.1", forwarder.local_addr().port());
    info!(%relayed, bridge = %rewritten.address(), "Outbound redirected through TURN relay");

    Ok((rewritten, forwarder))
}

/// Bind a local port and forward it through `relay` to `target`
///
/// The relay is closed if the bridge cannot be started.
async fn bridge_relay(
    relay: Arc<dyn RelayConn>,
    target: SocketAddr,
    ports: RangeInclusive<u16>,
    attempts: usize,
) -> Result<RelayForwarder> {
    let started = match bind_random_port(ports, attempts).await {
        Ok(local) => RelayForwarder::start(local, relay.clone(), target).await,
        Err(e) => Err(e),
    };
    if started.is_err() {
        if let Err(e) = relay.close().await {
            debug!(error = %e, "Failed to release TURN allocation");
        }
    }
    started
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::UdpSocket;

    #[derive(Default)]
    struct CountingRelay {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl RelayConn for CountingRelay {
        async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
            Ok(buf.len())
        }

        async fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            std::future::pending().await
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 3478)))
        }

        async fn close(&self) -> io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bridge_failure_releases_relay() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let relay = Arc::new(CountingRelay::default());

        let err = bridge_relay(relay.clone(), "192.0.2.1:51820".parse().unwrap(), port..=port, 3)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::NoPortAvailable { .. }));
        assert_eq!(relay.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bridge_keeps_relay_open() {
        let relay = Arc::new(CountingRelay::default());
        let target = "192.0.2.1:51820".parse().unwrap();
        let forwarder = bridge_relay(relay.clone(), target, EPHEMERAL_PORTS, MAX_PORT_ATTEMPTS)
            .await
            .unwrap();
        assert!(forwarder.local_addr().ip().is_loopback());
        assert_eq!(relay.closes.load(Ordering::SeqCst), 0);
    }
}
