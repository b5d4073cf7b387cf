//! macOS and iOS socket controls

use super::unix::setsockopt_int;
use super::{interface_index, Family};
use crate::error::{PlatformError, Result};
use crate::traits::InterfaceFinder;
use socket2::{Protocol, Socket};
use std::num::NonZeroU32;

const IP_DONTFRAG: libc::c_int = 28;
const IPV6_DONTFRAG: libc::c_int = 62;

pub(crate) const TCP_FAST_OPEN_SUPPORTED: bool = false;

/// `IP_BOUND_IF` / `IPV6_BOUND_IF`
pub(crate) fn bind_to_interface(
    socket: &Socket,
    name: &str,
    finder: Option<&dyn InterfaceFinder>,
    family: Family,
) -> Result<()> {
    let index = interface_index(name, finder)
        .and_then(NonZeroU32::new)
        .ok_or_else(|| {
            PlatformError::socket_option("IP_BOUND_IF", format!("unknown interface '{name}'"))
        })?;
    if family.covers_v6() {
        socket
            .bind_device_by_index_v6(Some(index))
            .map_err(|e| PlatformError::socket_option("IPV6_BOUND_IF", e))
    } else {
        socket
            .bind_device_by_index_v4(Some(index))
            .map_err(|e| PlatformError::socket_option("IP_BOUND_IF", e))
    }
}

pub(crate) fn set_routing_mark(_socket: &Socket, _mark: u32) -> Result<()> {
    Err(PlatformError::Unsupported("routing_mark"))
}

pub(crate) fn disable_udp_fragmentation(socket: &Socket, family: Family) -> Result<()> {
    if family.covers_v6() {
        setsockopt_int(socket, libc::IPPROTO_IPV6, IPV6_DONTFRAG, 1, "IPV6_DONTFRAG")
    } else {
        setsockopt_int(socket, libc::IPPROTO_IP, IP_DONTFRAG, 1, "IP_DONTFRAG")
    }
}

pub(crate) fn set_tcp_fast_open(_socket: &Socket) -> Result<()> {
    Err(PlatformError::Unsupported("tcp_fast_open"))
}

pub(crate) fn multipath_protocol() -> Option<Protocol> {
    None
}
