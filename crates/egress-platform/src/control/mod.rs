//! Socket controls applied between socket creation and bind/connect
//!
//! Each platform module exposes the same set of functions; unsupported
//! controls fail with [`PlatformError::Unsupported`].

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
#[cfg(any(target_os = "linux", target_os = "android"))]
use linux as os;

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod apple;
#[cfg(any(target_os = "macos", target_os = "ios"))]
use apple as os;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
mod other;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
use other as os;

#[cfg(unix)]
mod unix;

pub(crate) use os::{
    bind_to_interface, disable_udp_fragmentation, multipath_protocol, set_routing_mark,
    set_tcp_fast_open, TCP_FAST_OPEN_SUPPORTED,
};

use crate::error::{PlatformError, Result};
use crate::traits::InterfaceFinder;
use egress_core::options::{KEEPALIVE_INITIAL, KEEPALIVE_INTERVAL};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use socket2::{Socket, TcpKeepalive};
use std::io;
use std::sync::Arc;

/// Address family a control is applied for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// IPv4 only
    V4,
    /// IPv6 only
    V6,
    /// IPv6 socket accepting v4-mapped traffic
    Dual,
}

impl Family {
    pub(crate) fn covers_v4(self) -> bool {
        matches!(self, Self::V4 | Self::Dual)
    }

    pub(crate) fn covers_v6(self) -> bool {
        matches!(self, Self::V6 | Self::Dual)
    }
}

/// Extra control run on WireGuard listener sockets
pub type ControlFn = Arc<dyn Fn(&Socket) -> io::Result<()> + Send + Sync>;

static WIREGUARD_CONTROLS: Lazy<RwLock<Vec<ControlFn>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Register a control applied to every WireGuard listener socket
///
/// Embedders use this for platform hooks such as VPN-service socket
/// protection that only concerns WireGuard's own UDP socket.
pub fn register_wireguard_control(control: ControlFn) {
    WIREGUARD_CONTROLS.write().push(control);
}

pub(crate) fn apply_wireguard_controls(socket: &Socket) -> Result<()> {
    for control in WIREGUARD_CONTROLS.read().iter() {
        control(socket).map_err(|e| PlatformError::socket_option("wireguard control", e))?;
    }
    Ok(())
}

/// Keep-alive with the fixed initial delay and probe interval
pub(crate) fn set_keepalive(socket: &Socket) -> Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_INITIAL)
        .with_interval(KEEPALIVE_INTERVAL);
    socket
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| PlatformError::socket_option("SO_KEEPALIVE", e))
}

pub(crate) fn set_reuse_addr(socket: &Socket) -> Result<()> {
    socket
        .set_reuse_address(true)
        .map_err(|e| PlatformError::socket_option("SO_REUSEADDR", e))
}

/// Hand the socket to an Android-style protect service
pub(crate) fn protect(socket: &Socket, path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        unix::protect(socket, path)
    }
    #[cfg(not(unix))]
    {
        let _ = (socket, path);
        Err(PlatformError::Unsupported("protect_path"))
    }
}

/// Resolve an interface index, preferring the router's finder
#[cfg_attr(not(any(target_os = "macos", target_os = "ios")), allow(dead_code))]
pub(crate) fn interface_index(name: &str, finder: Option<&dyn InterfaceFinder>) -> Option<u32> {
    if let Some(index) = finder.and_then(|f| f.index_by_name(name)) {
        return Some(index);
    }
    #[cfg(unix)]
    {
        nix::net::if_::if_nametoindex(name).ok()
    }
    #[cfg(not(unix))]
    {
        None
    }
}
