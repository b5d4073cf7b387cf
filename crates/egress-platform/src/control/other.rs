//! Fallback for targets without native socket controls

use super::Family;
use crate::error::{PlatformError, Result};
use crate::traits::InterfaceFinder;
use socket2::{Protocol, Socket};
use tracing::debug;

pub(crate) const TCP_FAST_OPEN_SUPPORTED: bool = false;

pub(crate) fn bind_to_interface(
    _socket: &Socket,
    _name: &str,
    _finder: Option<&dyn InterfaceFinder>,
    _family: Family,
) -> Result<()> {
    Err(PlatformError::Unsupported("bind_interface"))
}

pub(crate) fn set_routing_mark(_socket: &Socket, _mark: u32) -> Result<()> {
    Err(PlatformError::Unsupported("routing_mark"))
}

pub(crate) fn disable_udp_fragmentation(_socket: &Socket, _family: Family) -> Result<()> {
    debug!("UDP don't-fragment not available on this target");
    Ok(())
}

pub(crate) fn set_tcp_fast_open(_socket: &Socket) -> Result<()> {
    Err(PlatformError::Unsupported("tcp_fast_open"))
}

pub(crate) fn multipath_protocol() -> Option<Protocol> {
    None
}
