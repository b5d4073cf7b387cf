//! Local UDP port <-> relay bridge

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const MAX_DATAGRAM: usize = 65535;

/// Pause after a failed receive so a dead socket cannot spin the task
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Datagram transport on the relay side of the bridge
#[async_trait]
pub trait RelayConn: Send + Sync {
    /// Send `buf` to `target` through the relay
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram from the relay
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Address of the relay transport
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Release the relay
    async fn close(&self) -> io::Result<()>;
}

#[async_trait]
impl RelayConn for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    async fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Background bridge between a local UDP socket and a relay
///
/// Runs until [`close`](Self::close) is called or the forwarder is dropped.
pub struct RelayForwarder {
    local_addr: SocketAddr,
    target: SocketAddr,
    relay: Arc<dyn RelayConn>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayForwarder {
    /// Spawn both directions and wait until the local side is listening
    pub async fn start(local: UdpSocket, relay: Arc<dyn RelayConn>, target: SocketAddr) -> Result<Self> {
        let local_addr = local.local_addr()?;
        let local = Arc::new(local);
        let last_sender = Arc::new(Mutex::new(None));
        let (shutdown, _) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();

        let outbound = tokio::spawn(local_to_relay(
            local.clone(),
            relay.clone(),
            target,
            last_sender.clone(),
            shutdown.subscribe(),
            ready_tx,
        ));
        let inbound = tokio::spawn(relay_to_local(
            local,
            relay.clone(),
            last_sender,
            shutdown.subscribe(),
        ));

        // The sender is only dropped without sending if the task died first.
        let _ = ready_rx.await;
        info!(local = %local_addr, %target, "Relay forwarder started");

        Ok(Self {
            local_addr,
            target,
            relay,
            shutdown,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(vec![outbound, inbound]),
        })
    }

    /// Address peers should send to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Upstream address datagrams are relayed to
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Whether [`close`](Self::close) already ran
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop both directions and release the relay; later calls do nothing
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            // Cancellation is the expected outcome.
            let _ = task.await;
        }

        if let Err(e) = self.relay.close().await {
            warn!(error = %e, "Failed to close relay");
        }
        info!(local = %self.local_addr, "Relay forwarder stopped");
    }
}

impl Drop for RelayForwarder {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for RelayForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayForwarder")
            .field("local_addr", &self.local_addr)
            .field("target", &self.target)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn local_to_relay(
    local: Arc<UdpSocket>,
    relay: Arc<dyn RelayConn>,
    target: SocketAddr,
    last_sender: Arc<Mutex<Option<SocketAddr>>>,
    mut shutdown: watch::Receiver<bool>,
    ready: oneshot::Sender<()>,
) {
    let _ = ready.send(());
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = local.recv_from(&mut buf) => match received {
                Ok((n, from)) => {
                    *last_sender.lock() = Some(from);
                    trace!(len = n, %from, "local -> relay");
                    if let Err(e) = relay.send_to(&buf[..n], target).await {
                        warn!(error = %e, %target, "Failed to forward datagram to relay");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Local bridge receive failed");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            },
        }
    }
    debug!("local -> relay loop exited");
}

async fn relay_to_local(
    local: Arc<UdpSocket>,
    relay: Arc<dyn RelayConn>,
    last_sender: Arc<Mutex<Option<SocketAddr>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = relay.recv_from(&mut buf) => match received {
                Ok((n, from)) => {
                    let peer = *last_sender.lock();
                    let Some(peer) = peer else {
                        trace!(len = n, %from, "No local peer yet, dropping datagram");
                        continue;
                    };
                    trace!(len = n, %peer, "relay -> local");
                    if let Err(e) = local.send_to(&buf[..n], peer).await {
                        warn!(error = %e, %peer, "Failed to forward datagram to local peer");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Relay receive failed");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            },
        }
    }
    debug!("relay -> local loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let local = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay: Arc<dyn RelayConn> = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let target = "127.0.0.1:9".parse().unwrap();
        let forwarder = RelayForwarder::start(local, relay, target).await.unwrap();
        assert!(!forwarder.is_closed());
        forwarder.close().await;
        forwarder.close().await;
        assert!(forwarder.is_closed());
    }
}
