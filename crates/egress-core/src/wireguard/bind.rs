//! Packet-level bind used by the WireGuard device

use super::fake_packet::{send_disguised, FakePacketPolicy};
use super::message::MessageType;
use crate::dialer::PacketListener;
use crate::error::Result;
use crate::pause::PauseManager;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

/// Settle time around a rebind
pub const REBIND_SETTLE: Duration = Duration::from_millis(50);

/// Datagram send/receive surface the fake-packet layer writes through
#[async_trait]
pub trait PacketBind: Send + Sync {
    /// Send one datagram
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl PacketBind for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }
}

/// Client-side bind for one WireGuard peer
///
/// Opens its socket through a [`PacketListener`] so dialer bind options
/// apply, disguises outgoing packets and filters incoming ones.
pub struct ClientBind {
    listener: Arc<dyn PacketListener>,
    pause: Option<Arc<dyn PauseManager>>,
    policy: FakePacketPolicy,
    reserved: [u8; 3],
    endpoint: SocketAddr,
    socket: RwLock<Option<Arc<UdpSocket>>>,
}

impl ClientBind {
    /// Create a bind for the peer at `endpoint`
    pub fn new(
        listener: Arc<dyn PacketListener>,
        policy: FakePacketPolicy,
        reserved: [u8; 3],
        endpoint: SocketAddr,
    ) -> Self {
        Self {
            listener,
            pause: None,
            policy,
            reserved,
            endpoint,
            socket: RwLock::new(None),
        }
    }

    /// Gate rebinding on a pause manager
    pub fn with_pause_manager(mut self, pause: Arc<dyn PauseManager>) -> Self {
        self.pause = Some(pause);
        self
    }

    /// Peer address
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Local address of the current socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.read().as_ref().and_then(|s| s.local_addr().ok())
    }

    /// The open socket, creating it on first use
    pub async fn open(&self) -> Result<Arc<UdpSocket>> {
        if let Some(socket) = self.socket.read().clone() {
            return Ok(socket);
        }

        let socket = Arc::new(self.listener.listen_packet(self.endpoint).await?);
        let mut slot = self.socket.write();
        match slot.as_ref() {
            Some(existing) => Ok(existing.clone()),
            None => {
                debug!(local = ?socket.local_addr().ok(), endpoint = %self.endpoint, "Opened WireGuard socket");
                *slot = Some(socket.clone());
                Ok(socket)
            }
        }
    }

    /// Send a WireGuard message to the peer
    pub async fn send(&self, packet: &[u8]) -> io::Result<()> {
        let socket = self.open().await.map_err(io::Error::from)?;
        send_disguised(socket.as_ref(), &self.policy, self.reserved, packet, self.endpoint).await
    }

    /// Receive the next WireGuard message, skipping fillers
    ///
    /// A rebind takes effect for receivers on their next call.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr, MessageType)> {
        let socket = self.open().await.map_err(io::Error::from)?;
        loop {
            let (n, from) = PacketBind::recv_from(socket.as_ref(), buf).await?;
            match self.policy.restore(&mut buf[..n]) {
                Some(kind) => return Ok((n, from, kind)),
                None => trace!(len = n, %from, "Dropped non-WireGuard datagram"),
            }
        }
    }

    /// Replace the socket after an interface change
    ///
    /// Skipped (returns `false`) while the pause manager reports paused.
    pub async fn rebind(&self) -> Result<bool> {
        if self.pause.as_ref().is_some_and(|p| p.is_paused()) {
            debug!("Paused, skipping WireGuard rebind");
            return Ok(false);
        }

        tokio::time::sleep(REBIND_SETTLE).await;
        let socket = Arc::new(self.listener.listen_packet(self.endpoint).await?);
        let local = socket.local_addr().ok();
        let previous = self.socket.write().replace(socket);
        drop(previous);
        tokio::time::sleep(REBIND_SETTLE).await;

        info!(local = ?local, endpoint = %self.endpoint, "Rebound WireGuard socket");
        Ok(true)
    }

    /// Drop the socket; the next send or receive reopens it
    pub fn close(&self) {
        self.socket.write().take();
    }
}

impl std::fmt::Debug for ClientBind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBind")
            .field("endpoint", &self.endpoint)
            .field("reserved", &self.reserved)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
