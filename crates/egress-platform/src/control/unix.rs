//! Helpers shared by every Unix target

use crate::error::{PlatformError, Result};
use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
use socket2::Socket;
use std::io::{IoSlice, Read};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::debug;

const PROTECT_TIMEOUT: Duration = Duration::from_secs(3);

/// `setsockopt` with an `int` value
#[cfg_attr(
    not(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "ios")),
    allow(dead_code)
)]
pub(super) fn setsockopt_int(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
    option: &'static str,
) -> Result<()> {
    // SAFETY: the fd is owned by `socket` and the value pointer/length
    // describe a live c_int.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(PlatformError::socket_option(option, std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Pass the socket's fd to the protect service at `path`
///
/// The service answers with a single byte; anything but 0 is a refusal.
pub(super) fn protect(socket: &Socket, path: &str) -> Result<()> {
    let fail = |reason: String| PlatformError::Protect {
        path: path.to_string(),
        reason,
    };

    let mut stream = UnixStream::connect(path).map_err(|e| fail(e.to_string()))?;
    stream
        .set_read_timeout(Some(PROTECT_TIMEOUT))
        .map_err(|e| fail(e.to_string()))?;

    let fds = [socket.as_raw_fd()];
    let cmsgs = [ControlMessage::ScmRights(&fds)];
    let payload = [0u8; 1];
    let iov = [IoSlice::new(&payload)];
    sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
        .map_err(|e| fail(e.to_string()))?;

    let mut reply = [0u8; 1];
    stream.read_exact(&mut reply).map_err(|e| fail(e.to_string()))?;
    if reply[0] != 0 {
        return Err(fail(format!("service refused with code {}", reply[0])));
    }
    debug!(path, fd = fds[0], "Socket protected");
    Ok(())
}
