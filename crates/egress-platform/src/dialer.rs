//! The default outbound dialer
//!
//! Composes the Socket Binder, TLS fragmentation, tunnel wrapping and
//! connection tracking behind the [`Dialer`] contract.

use crate::binder::SocketBinder;
use crate::error::{PlatformError, Result};
use crate::traits::{RouterDefaults, TunnelForwarder};
use crate::tunnel::{start_tunnel, TunnelConn};
use async_trait::async_trait;
use egress_core::options::{DialerOptions, TunnelOptions};
use egress_core::tls::{FragmentConn, TlsFragmentPolicy};
use egress_core::{conntrack, BoxedStream, DatagramConn, Dialer, Network, OutboundConn, PacketListener};
use socket2::Socket;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::{debug, instrument};

/// Dialer backed by OS sockets
pub struct DefaultDialer {
    binder: Arc<SocketBinder>,
    fragment: Option<TlsFragmentPolicy>,
    tunnel: Option<TunnelOptions>,
    forwarder: Option<Arc<dyn TunnelForwarder>>,
}

impl fmt::Debug for DefaultDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultDialer")
            .field("binder", &self.binder)
            .field("fragment", &self.fragment)
            .field("tunnel", &self.tunnel.as_ref().map(|t| &t.target))
            .finish_non_exhaustive()
    }
}

impl DefaultDialer {
    /// Build a dialer; every configuration error surfaces here
    #[instrument(skip_all)]
    pub fn new(options: &DialerOptions, router: Option<Arc<dyn RouterDefaults>>) -> Result<Self> {
        let binder = SocketBinder::new(options, router)?;
        let fragment = TlsFragmentPolicy::from_enabled(options.tls_fragment.as_ref())?;
        let tunnel = options.tunnel.enabled.then(|| options.tunnel.clone());
        if let Some(policy) = &fragment {
            debug!(size = %policy.size, sleep = %policy.sleep, sni_split = policy.sni_split, "TLS fragmentation enabled");
        }
        Ok(Self {
            binder: Arc::new(binder),
            fragment,
            tunnel,
            forwarder: None,
        })
    }

    /// Forwarder used when tunnel wrapping is enabled
    pub fn with_tunnel_forwarder(mut self, forwarder: Arc<dyn TunnelForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// The underlying binder
    pub fn binder(&self) -> &SocketBinder {
        &self.binder
    }

    /// Whether outgoing ClientHellos are fragmented
    pub fn fragments_tls(&self) -> bool {
        self.fragment.is_some()
    }

    fn tunnel(&self) -> Result<Option<(&TunnelOptions, &dyn TunnelForwarder)>> {
        match (&self.tunnel, &self.forwarder) {
            (None, _) => Ok(None),
            (Some(options), Some(forwarder)) => Ok(Some((options, forwarder.as_ref()))),
            (Some(_), None) => Err(egress_core::Error::config_value(
                "tunnel",
                "tunnel enabled but no tunnel forwarder installed",
            )
            .into()),
        }
    }

    async fn dial_stream(&self, destination: SocketAddr) -> Result<BoxedStream> {
        let socket = self.binder.tcp_socket(destination)?;
        let socket = self.binder.protect(socket).await?;
        let timeout = self.binder.connect_timeout();

        match &self.fragment {
            Some(policy) => {
                // Connect is driven by the first write of the handshake.
                let connect = async move {
                    connect_tcp(socket, destination, timeout)
                        .await
                        .map_err(|e| io::Error::from(egress_core::Error::from(e)))
                };
                let conn = FragmentConn::connecting(connect, policy.clone());
                Ok(Box::new(conntrack::track(conn)))
            }
            None => {
                let stream = connect_tcp(socket, destination, timeout).await?;
                Ok(Box::new(conntrack::track(stream)))
            }
        }
    }

    async fn dial_datagram(&self, destination: SocketAddr) -> Result<UdpSocket> {
        let socket = self.binder.protect(self.binder.udp_socket(destination)?).await?;
        let socket = UdpSocket::from_std(socket.into())?;
        socket.connect(destination).await?;
        Ok(socket)
    }
}

/// Connect a prepared non-blocking socket within `timeout`
async fn connect_tcp(socket: Socket, destination: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let socket = TcpSocket::from_std_stream(socket.into());
    match tokio::time::timeout(timeout, socket.connect(destination)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(PlatformError::Timeout {
            addr: destination,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[async_trait]
impl PacketListener for DefaultDialer {
    #[instrument(skip(self), level = "debug")]
    async fn listen_packet(&self, destination: SocketAddr) -> egress_core::Result<UdpSocket> {
        let socket = self.binder.listen_socket(destination)?;
        let socket = self.binder.protect(socket).await?;
        Ok(UdpSocket::from_std(socket.into())?)
    }
}

#[async_trait]
impl Dialer for DefaultDialer {
    #[instrument(skip(self), level = "debug")]
    async fn dial_context(
        &self,
        network: Network,
        destination: SocketAddr,
    ) -> egress_core::Result<OutboundConn> {
        let Some((options, forwarder)) = self.tunnel()? else {
            return Ok(match network {
                Network::Tcp => OutboundConn::Stream(self.dial_stream(destination).await?),
                Network::Udp => {
                    OutboundConn::Datagram(DatagramConn::new(self.dial_datagram(destination).await?).tracked())
                }
            });
        };

        let guard = start_tunnel(forwarder, destination, options).await?;
        let local = guard.local_addr();
        debug!(%local, "Dialing through tunnel");
        Ok(match network {
            Network::Tcp => {
                let stream = self.dial_stream(local).await?;
                OutboundConn::Stream(Box::new(TunnelConn::new(stream, guard)))
            }
            Network::Udp => {
                let socket = self.dial_datagram(local).await?;
                OutboundConn::Datagram(DatagramConn::with_guard(socket, Box::new(guard)).tracked())
            }
        })
    }
}
