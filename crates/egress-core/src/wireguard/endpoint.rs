//! Peer endpoint resolution, optionally through a TURN relay

use crate::error::Result;
use crate::options::{ServerOptions, TurnRelayOptions};
use crate::turn::{apply_turn_relay, resolve, RelayForwarder};
use std::net::SocketAddr;
use tracing::debug;

/// Where a WireGuard peer is actually reached
///
/// When relayed, the endpoint owns the bridge; closing or dropping the
/// endpoint stops it.
#[derive(Debug)]
pub struct PeerEndpoint {
    server: ServerOptions,
    original: ServerOptions,
    forwarder: Option<RelayForwarder>,
}

impl PeerEndpoint {
    /// Apply `turn` (if any) to the peer at `server`
    pub async fn establish(server: ServerOptions, turn: Option<&TurnRelayOptions>) -> Result<Self> {
        let Some(turn) = turn.filter(|t| t.server.is_set()) else {
            debug!(server = %server.address(), "Peer reached directly");
            return Ok(Self {
                original: server.clone(),
                server,
                forwarder: None,
            });
        };

        let (rewritten, forwarder) = apply_turn_relay(&server, turn).await?;
        Ok(Self {
            server: rewritten,
            original: server,
            forwarder: Some(forwarder),
        })
    }

    /// Server the WireGuard device should dial
    pub fn server(&self) -> &ServerOptions {
        &self.server
    }

    /// Server as configured, before any relay rewrite
    pub fn original(&self) -> &ServerOptions {
        &self.original
    }

    /// Whether traffic goes through a TURN relay
    pub fn is_relayed(&self) -> bool {
        self.forwarder.is_some()
    }

    /// Resolve the dial address
    pub async fn resolve(&self) -> Result<SocketAddr> {
        resolve(&self.server.address()).await
    }

    /// Stop the relay bridge, if any
    pub async fn close(&self) {
        if let Some(forwarder) = &self.forwarder {
            forwarder.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_endpoint() {
        let endpoint = PeerEndpoint::establish(ServerOptions::new("127.0.0.1", 51820), None)
            .await
            .unwrap();
        assert!(!endpoint.is_relayed());
        assert_eq!(endpoint.server(), endpoint.original());
        assert_eq!(endpoint.resolve().await.unwrap(), "127.0.0.1:51820".parse().unwrap());
        endpoint.close().await;
    }

    #[tokio::test]
    async fn test_unset_turn_is_direct() {
        let turn = TurnRelayOptions::default();
        let endpoint = PeerEndpoint::establish(ServerOptions::new("::1", 51820), Some(&turn))
            .await
            .unwrap();
        assert!(!endpoint.is_relayed());
        assert_eq!(endpoint.server().address(), "[::1]:51820");
    }
}
