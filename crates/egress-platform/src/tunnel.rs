//! Tunnel wrapping for dialed connections
//!
//! The dialer starts a [`TunnelForwarder`] on a random loopback port and
//! connects to that port instead of the destination. The forwarder lives
//! exactly as long as the connection.

use crate::traits::{TunnelForwarder, TunnelHandle};
use egress_core::options::TunnelOptions;
use egress_core::{Error, Result};
use rand::Rng;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

/// Local ports the forwarder may listen on
pub const TUNNEL_PORTS: RangeInclusive<u16> = 1024..=65535;

/// Stops the forwarder when dropped
pub struct TunnelGuard {
    handle: Option<Box<dyn TunnelHandle>>,
    local: SocketAddr,
}

impl TunnelGuard {
    /// Loopback address the forwarder listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Stop the forwarder now
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
            debug!(local = %self.local, "Tunnel forwarder stopped");
        }
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start a forwarder for `destination` on a random loopback port
pub async fn start_tunnel(
    forwarder: &dyn TunnelForwarder,
    destination: SocketAddr,
    options: &TunnelOptions,
) -> Result<TunnelGuard> {
    let port = rand::thread_rng().gen_range(TUNNEL_PORTS);
    let local = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let handle = forwarder
        .start(local, destination, options)
        .await
        .map_err(|e| {
            let kind = match &e {
                Error::Io(err) => err.kind(),
                _ => io::ErrorKind::Other,
            };
            Error::Io(io::Error::new(kind, format!("failed to listen tunnel on {local}: {e}")))
        })?;
    info!(%local, %destination, target = %options.target, "Tunnel forwarder listening");
    Ok(TunnelGuard {
        handle: Some(handle),
        local,
    })
}

/// A stream routed through a tunnel forwarder
pub struct TunnelConn<S> {
    inner: S,
    guard: TunnelGuard,
}

impl<S> TunnelConn<S> {
    /// Tie `guard` to `inner`
    pub fn new(inner: S, guard: TunnelGuard) -> Self {
        Self { inner, guard }
    }

    /// Whether the forwarder is still running
    pub fn is_forwarding(&self) -> bool {
        self.guard.handle.is_some()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TunnelConn<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TunnelConn<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = ready!(Pin::new(&mut self.inner).poll_shutdown(cx));
        self.guard.stop();
        Poll::Ready(result)
    }
}
