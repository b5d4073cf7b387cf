//! Collaborators supplied by the embedding router
//!
//! The dialer never discovers interfaces or tunnels on its own; a router
//! hands them in through these traits.

use async_trait::async_trait;
use egress_core::options::TunnelOptions;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Interface name/index lookup
#[cfg_attr(test, mockall::automock)]
pub trait InterfaceFinder: Send + Sync {
    /// Index of the interface called `name`
    fn index_by_name(&self, name: &str) -> Option<u32>;
}

/// Router-wide socket defaults
///
/// Consulted only when the outbound leaves the matching option unset.
#[cfg_attr(test, mockall::automock)]
pub trait RouterDefaults: Send + Sync {
    /// Whether the router tracks the default route interface itself
    fn auto_detect_interface(&self) -> bool;

    /// Interface currently routing `destination`, when auto-detecting
    fn detected_interface(&self, destination: IpAddr) -> Option<String>;

    /// Statically configured default interface
    fn default_interface(&self) -> Option<String>;

    /// Default `SO_MARK` (0 = unset)
    fn default_mark(&self) -> u32;

    /// Lookup used to turn interface names into indices
    fn interface_finder(&self) -> Option<Arc<dyn InterfaceFinder>>;
}

/// Starts local forwarders that carry traffic through a tunnel
#[async_trait]
pub trait TunnelForwarder: Send + Sync {
    /// Listen on `local` and forward accepted traffic to `destination`
    /// through the tunnel described by `options`
    ///
    /// Must not return before `local` is accepting.
    async fn start(
        &self,
        local: SocketAddr,
        destination: SocketAddr,
        options: &TunnelOptions,
    ) -> egress_core::Result<Box<dyn TunnelHandle>>;
}

/// A running tunnel forwarder
pub trait TunnelHandle: Send + Sync {
    /// Stop forwarding and release the local port; idempotent
    fn stop(&self);
}
