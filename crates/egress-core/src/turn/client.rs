//! TURN allocation via the `turn` crate

use super::forwarder::RelayConn;
use crate::error::{Error, Result};
use crate::options::TurnRelayOptions;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{info, instrument};
use ::turn::client::{Client, ClientConfig};
use webrtc_util::Conn;

/// An allocated relay transport address on a TURN server
///
/// Holds the TURN client for as long as the allocation is used; closing
/// the relay releases both.
pub struct TurnRelay {
    server: String,
    client: Client,
    conn: Box<dyn Conn + Send + Sync>,
    relayed_addr: SocketAddr,
}

impl TurnRelay {
    /// Dial the TURN server, authenticate and allocate a relay
    #[instrument(skip(options), fields(server = %options.server.address()))]
    pub async fn allocate(options: &TurnRelayOptions) -> Result<Self> {
        options.validate()?;
        let server = options.server.address();
        let server_addr = resolve(&server).await?;

        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::turn(&server, "dial", e))?;

        let config = ClientConfig {
            stun_serv_addr: server_addr.to_string(),
            turn_serv_addr: server_addr.to_string(),
            username: options.username.clone(),
            password: options.password.clone(),
            realm: options.realm.clone(),
            software: String::new(),
            rto_in_ms: 0,
            conn: Arc::new(socket),
            vnet: None,
        };

        let client = Client::new(config)
            .await
            .map_err(|e| Error::turn(&server, "client", e))?;
        client
            .listen()
            .await
            .map_err(|e| Error::turn(&server, "listen", e))?;

        let conn = match client.allocate().await {
            Ok(conn) => conn,
            Err(e) => {
                // Best effort; the allocation error is what matters.
                let _ = client.close().await;
                return Err(Error::turn(&server, "allocate", e));
            }
        };
        let relayed_addr = conn
            .local_addr()
            .map_err(|e| Error::turn(&server, "allocate", e))?;
        info!(relayed = %relayed_addr, "TURN relay allocated");

        Ok(Self {
            server,
            client,
            conn: Box::new(conn),
            relayed_addr,
        })
    }

    /// Transport address assigned by the server
    pub fn relayed_addr(&self) -> SocketAddr {
        self.relayed_addr
    }

    /// `host:port` of the TURN server
    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl RelayConn for TurnRelay {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.conn.send_to(buf, target).await.map_err(io::Error::other)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.conn.recv_from(buf).await.map_err(io::Error::other)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.relayed_addr)
    }

    async fn close(&self) -> io::Result<()> {
        let relay = self.conn.close().await.map_err(io::Error::other);
        let client = self.client.close().await.map_err(io::Error::other);
        relay.and(client)
    }
}

/// Resolve `host:port` to its first address
pub(crate) async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|e| Error::InvalidAddress {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| Error::InvalidAddress {
            addr: addr.to_string(),
            reason: "no addresses found".to_string(),
        })
}
