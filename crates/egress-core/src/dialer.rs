//! Dial/listen contract consumed by outbound protocols
//!
//! Cancellation follows the usual async rule: dropping the returned future
//! aborts the dial and releases any half-open socket.

use crate::conntrack::{self, Registration};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UdpSocket;

/// Stream transport usable behind a trait object
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Boxed stream transport
pub type BoxedStream = Box<dyn AsyncStream>;

/// Transport kind requested by an outbound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Stream (TCP)
    Tcp,
    /// Datagram (UDP)
    Udp,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// A connected UDP socket plus whatever must outlive it
pub struct DatagramConn {
    socket: UdpSocket,
    guard: Option<Box<dyn Send + Sync>>,
    registration: Option<Registration>,
}

impl DatagramConn {
    /// A plain connected socket
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            guard: None,
            registration: None,
        }
    }

    /// A socket whose traffic depends on `guard` (a local forwarder, ...)
    ///
    /// The guard is dropped together with the socket.
    pub fn with_guard(socket: UdpSocket, guard: Box<dyn Send + Sync>) -> Self {
        Self {
            guard: Some(guard),
            ..Self::new(socket)
        }
    }

    /// Register with [`conntrack`](crate::conntrack) when tracking is enabled
    pub fn tracked(mut self) -> Self {
        if self.registration.is_none() {
            self.registration = Registration::register();
        }
        self
    }

    /// Whether a guard is attached
    pub fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }

    /// Whether the tracker aborted this socket
    pub fn is_aborted(&self) -> bool {
        self.registration.as_ref().is_some_and(Registration::is_aborted)
    }

    /// Send one datagram to the connected peer
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        if self.is_aborted() {
            return Err(conntrack::aborted_error());
        }
        self.socket.send(buf).await
    }

    /// Receive one datagram from the connected peer
    ///
    /// A pending receive fails with `ConnectionAborted` once the tracker
    /// closes all connections.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(registration) = &self.registration else {
            return self.socket.recv(buf).await;
        };
        tokio::select! {
            biased;
            _ = registration.aborted() => Err(conntrack::aborted_error()),
            received = self.socket.recv(buf) => received,
        }
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Connected peer address
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Borrow the socket, bypassing abort checks
    pub fn get_ref(&self) -> &UdpSocket {
        &self.socket
    }
}

/// A dialed outbound connection
pub enum OutboundConn {
    /// Connected stream
    Stream(BoxedStream),
    /// Connected datagram socket
    Datagram(DatagramConn),
}

impl OutboundConn {
    /// Take the stream, if this is one
    pub fn into_stream(self) -> Option<BoxedStream> {
        match self {
            Self::Stream(stream) => Some(stream),
            Self::Datagram(_) => None,
        }
    }

    /// Take the datagram socket, if this is one
    pub fn into_datagram(self) -> Option<DatagramConn> {
        match self {
            Self::Datagram(socket) => Some(socket),
            Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for OutboundConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("OutboundConn::Stream"),
            Self::Datagram(conn) => f
                .debug_struct("OutboundConn::Datagram")
                .field("local_addr", &conn.local_addr().ok())
                .field("guarded", &conn.is_guarded())
                .field("tracked", &conn.registration.is_some())
                .finish(),
        }
    }
}

/// Unconnected UDP socket factory
#[async_trait]
pub trait PacketListener: Send + Sync {
    /// Open a UDP socket suitable for reaching `destination`
    ///
    /// The destination only selects the address family and bind address.
    async fn listen_packet(&self, destination: SocketAddr) -> Result<UdpSocket>;
}

/// Outbound connection factory
///
/// Destinations are already resolved; dialers never perform DNS.
#[async_trait]
pub trait Dialer: PacketListener {
    /// Connect to `destination` over `network`
    async fn dial_context(&self, network: Network, destination: SocketAddr) -> Result<OutboundConn>;
}
