//! Linux and Android socket controls

use super::unix::setsockopt_int;
use super::Family;
use crate::error::{PlatformError, Result};
use crate::traits::InterfaceFinder;
use socket2::{Protocol, Socket};

/// `IPPROTO_MPTCP`
const IPPROTO_MPTCP: libc::c_int = 262;

/// `TCP_FASTOPEN_CONNECT`, Linux 4.11+
const TCP_FASTOPEN_CONNECT: libc::c_int = 30;

pub(crate) const TCP_FAST_OPEN_SUPPORTED: bool = true;

/// `SO_BINDTODEVICE`
pub(crate) fn bind_to_interface(
    socket: &Socket,
    name: &str,
    _finder: Option<&dyn InterfaceFinder>,
    _family: Family,
) -> Result<()> {
    if name.len() > 15 {
        return Err(PlatformError::socket_option(
            "SO_BINDTODEVICE",
            format!("interface name '{name}' longer than 15 bytes"),
        ));
    }
    socket
        .bind_device(Some(name.as_bytes()))
        .map_err(|e| PlatformError::socket_option("SO_BINDTODEVICE", e))
}

/// `SO_MARK`, needs `CAP_NET_ADMIN`
pub(crate) fn set_routing_mark(socket: &Socket, mark: u32) -> Result<()> {
    socket
        .set_mark(mark)
        .map_err(|e| PlatformError::socket_option("SO_MARK", e))
}

/// Set the don't-fragment bit through path MTU discovery
pub(crate) fn disable_udp_fragmentation(socket: &Socket, family: Family) -> Result<()> {
    if family.covers_v4() {
        setsockopt_int(
            socket,
            libc::IPPROTO_IP,
            libc::IP_MTU_DISCOVER,
            libc::IP_PMTUDISC_DO,
            "IP_MTU_DISCOVER",
        )?;
    }
    if family.covers_v6() {
        setsockopt_int(
            socket,
            libc::IPPROTO_IPV6,
            libc::IPV6_MTU_DISCOVER,
            libc::IPV6_PMTUDISC_DO,
            "IPV6_MTU_DISCOVER",
        )?;
    }
    Ok(())
}

/// Client-side fast open; data goes out with the SYN on first write
pub(crate) fn set_tcp_fast_open(socket: &Socket) -> Result<()> {
    setsockopt_int(
        socket,
        libc::IPPROTO_TCP,
        TCP_FASTOPEN_CONNECT,
        1,
        "TCP_FASTOPEN_CONNECT",
    )
}

/// Protocol for multipath TCP sockets
pub(crate) fn multipath_protocol() -> Option<Protocol> {
    Some(Protocol::from(IPPROTO_MPTCP))
}
