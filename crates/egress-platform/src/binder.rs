//! Socket Binder
//!
//! Turns [`DialerOptions`] plus optional router defaults into ready-to-use
//! sockets: one dial configuration per address family and one UDP listen
//! configuration. Option conflicts are rejected here, once, so dialing
//! never fails on configuration.

use crate::control::{self, Family};
use crate::error::{PlatformError, Result};
use crate::traits::RouterDefaults;
use egress_core::options::DialerOptions;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Which interface outgoing sockets are pinned to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceBinding {
    /// Leave routing to the OS
    Unbound,
    /// Always this interface
    Fixed(String),
    /// Ask the router per destination
    AutoDetect,
}

/// Pick the interface binding
///
/// Explicit option, then router auto-detect, then router default.
pub fn select_interface(
    explicit: Option<&str>,
    router: Option<&dyn RouterDefaults>,
) -> InterfaceBinding {
    if let Some(name) = explicit.filter(|name| !name.is_empty()) {
        return InterfaceBinding::Fixed(name.to_string());
    }
    let Some(router) = router else {
        return InterfaceBinding::Unbound;
    };
    if router.auto_detect_interface() {
        return InterfaceBinding::AutoDetect;
    }
    match router.default_interface() {
        Some(name) if !name.is_empty() => InterfaceBinding::Fixed(name),
        _ => InterfaceBinding::Unbound,
    }
}

/// Pick the routing mark: explicit option, then router default
pub fn select_mark(explicit: u32, router: Option<&dyn RouterDefaults>) -> u32 {
    if explicit != 0 {
        return explicit;
    }
    router.map_or(0, |r| r.default_mark())
}

/// Per-family dial settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialConfig {
    /// Address family
    pub family: Family,
    /// Local address bound before connecting
    pub local_addr: Option<IpAddr>,
    /// Use multipath TCP
    pub multipath: bool,
    /// Use TCP fast open
    pub fast_open: bool,
}

/// UDP listen settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenConfig {
    /// Bind address for IPv4 and dual-stack sockets
    pub inet4_addr: Option<Ipv4Addr>,
    /// Bind address for IPv6 sockets
    pub inet6_addr: Option<Ipv6Addr>,
    /// Set `SO_REUSEADDR`
    pub reuse_addr: bool,
    /// Run registered WireGuard controls
    pub wireguard: bool,
}

/// Builds sockets with every configured control applied
pub struct SocketBinder {
    interface: InterfaceBinding,
    mark: u32,
    protect_path: Option<String>,
    udp_fragment: bool,
    connect_timeout: Duration,
    router: Option<Arc<dyn RouterDefaults>>,
    dial4: DialConfig,
    dial6: DialConfig,
    listen: ListenConfig,
}

impl fmt::Debug for SocketBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketBinder")
            .field("interface", &self.interface)
            .field("mark", &self.mark)
            .field("protect_path", &self.protect_path)
            .field("udp_fragment", &self.udp_fragment)
            .field("connect_timeout", &self.connect_timeout)
            .field("dial4", &self.dial4)
            .field("dial6", &self.dial6)
            .field("listen", &self.listen)
            .finish_non_exhaustive()
    }
}

impl SocketBinder {
    /// Validate `options` and derive the bind configurations
    #[instrument(skip_all)]
    pub fn new(options: &DialerOptions, router: Option<Arc<dyn RouterDefaults>>) -> Result<Self> {
        options.validate()?;

        let interface = select_interface(options.bind_interface.as_deref(), router.as_deref());
        let mark = select_mark(options.routing_mark, router.as_deref());
        let mark = if mark != 0 && !cfg!(any(target_os = "linux", target_os = "android")) {
            if options.routing_mark != 0 {
                return Err(PlatformError::Unsupported("routing_mark"));
            }
            debug!(mark, "Ignoring router default mark on this platform");
            0
        } else {
            mark
        };

        if options.tcp_multi_path && control::multipath_protocol().is_none() {
            return Err(PlatformError::Unsupported("tcp_multi_path"));
        }
        let fast_open = if options.tcp_fast_open && !control::TCP_FAST_OPEN_SUPPORTED {
            warn!("TCP fast open not available on this platform, dialing without it");
            false
        } else {
            options.tcp_fast_open
        };

        let dial4 = DialConfig {
            family: Family::V4,
            local_addr: options.inet4_bind_address.map(IpAddr::V4),
            multipath: options.tcp_multi_path,
            fast_open,
        };
        let dial6 = DialConfig {
            family: Family::V6,
            local_addr: options.inet6_bind_address.map(IpAddr::V6),
            ..dial4.clone()
        };
        let listen = ListenConfig {
            inet4_addr: options.inet4_bind_address,
            inet6_addr: options.inet6_bind_address,
            reuse_addr: options.reuse_addr,
            wireguard: options.is_wireguard_listener,
        };

        debug!(?interface, mark, udp_fragment = options.udp_fragment_allowed(), "Socket binder ready");
        Ok(Self {
            interface,
            mark,
            protect_path: options.protect_path.clone().filter(|p| !p.is_empty()),
            udp_fragment: options.udp_fragment_allowed(),
            connect_timeout: options.connect_timeout(),
            router,
            dial4,
            dial6,
            listen,
        })
    }

    /// Interface binding in effect
    pub fn interface(&self) -> &InterfaceBinding {
        &self.interface
    }

    /// Routing mark in effect (0 = unset)
    pub fn mark(&self) -> u32 {
        self.mark
    }

    /// TCP connect timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Whether UDP sockets may fragment
    pub fn udp_fragment_allowed(&self) -> bool {
        self.udp_fragment
    }

    /// Dial settings for reaching `destination`
    pub fn dial_config(&self, destination: &SocketAddr) -> &DialConfig {
        if destination.is_ipv6() {
            &self.dial6
        } else {
            &self.dial4
        }
    }

    /// UDP listen settings
    pub fn listen_config(&self) -> &ListenConfig {
        &self.listen
    }

    /// Non-blocking TCP socket, bound and ready to connect to `destination`
    pub fn tcp_socket(&self, destination: SocketAddr) -> Result<Socket> {
        let config = self.dial_config(&destination);
        let protocol = if config.multipath {
            control::multipath_protocol()
        } else {
            Some(Protocol::TCP)
        };
        let socket = Socket::new(Domain::for_address(destination), Type::STREAM, protocol)?;
        self.apply_common(&socket, config.family, destination.ip())?;
        control::set_keepalive(&socket)?;
        if config.fast_open {
            control::set_tcp_fast_open(&socket)?;
        }
        if let Some(ip) = config.local_addr {
            bind(&socket, SocketAddr::new(ip, 0))?;
        }
        socket.set_nonblocking(true)?;
        trace!(%destination, "TCP socket prepared");
        Ok(socket)
    }

    /// Non-blocking UDP socket for a connected dial to `destination`
    pub fn udp_socket(&self, destination: SocketAddr) -> Result<Socket> {
        let config = self.dial_config(&destination);
        let socket = Socket::new(Domain::for_address(destination), Type::DGRAM, Some(Protocol::UDP))?;
        self.apply_common(&socket, config.family, destination.ip())?;
        if !self.udp_fragment {
            control::disable_udp_fragmentation(&socket, config.family)?;
        }
        let local = config
            .local_addr
            .unwrap_or_else(|| unspecified(config.family));
        bind(&socket, SocketAddr::new(local, 0))?;
        socket.set_nonblocking(true)?;
        trace!(%destination, "UDP socket prepared");
        Ok(socket)
    }

    /// Non-blocking unconnected UDP socket for sending to `destination`
    ///
    /// IPv6 destinations get an IPv6 socket on the v6 bind address,
    /// specific IPv4 destinations an IPv4 socket on the v4 bind address,
    /// anything else a dual-stack socket unless a v4 bind address pins
    /// the family.
    pub fn listen_socket(&self, destination: SocketAddr) -> Result<Socket> {
        let (socket, family, local) = match destination.ip() {
            IpAddr::V6(_) => {
                let local = IpAddr::V6(self.listen.inet6_addr.unwrap_or(Ipv6Addr::UNSPECIFIED));
                let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
                (socket, Family::V6, local)
            }
            IpAddr::V4(ip) if !ip.is_unspecified() => {
                let local = IpAddr::V4(self.listen.inet4_addr.unwrap_or(Ipv4Addr::UNSPECIFIED));
                let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
                (socket, Family::V4, local)
            }
            IpAddr::V4(_) => self.dual_stack_socket()?,
        };

        self.apply_common(&socket, family, destination.ip())?;
        if self.listen.reuse_addr {
            control::set_reuse_addr(&socket)?;
        }
        if !self.udp_fragment {
            control::disable_udp_fragmentation(&socket, family)?;
        }
        if self.listen.wireguard {
            control::apply_wireguard_controls(&socket)?;
        }
        bind(&socket, SocketAddr::new(local, 0))?;
        socket.set_nonblocking(true)?;
        trace!(%destination, ?family, "Listen socket prepared");
        Ok(socket)
    }

    fn dual_stack_socket(&self) -> Result<(Socket, Family, IpAddr)> {
        if let Some(ip) = self.listen.inet4_addr {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
            return Ok((socket, Family::V4, IpAddr::V4(ip)));
        }
        match Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)) {
            Ok(socket) => {
                socket.set_only_v6(false)?;
                Ok((socket, Family::Dual, IpAddr::V6(Ipv6Addr::UNSPECIFIED)))
            }
            Err(e) => {
                debug!(error = %e, "IPv6 unavailable, listening on IPv4 only");
                let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
                Ok((socket, Family::V4, IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
            }
        }
    }

    /// Interface and mark; shared by dial and listen sockets
    fn apply_common(&self, socket: &Socket, family: Family, destination: IpAddr) -> Result<()> {
        let interface = match &self.interface {
            InterfaceBinding::Unbound => None,
            InterfaceBinding::Fixed(name) => Some(name.clone()),
            InterfaceBinding::AutoDetect => self
                .router
                .as_ref()
                .and_then(|r| r.detected_interface(destination)),
        };
        if let Some(name) = interface {
            let finder = self.router.as_ref().and_then(|r| r.interface_finder());
            control::bind_to_interface(socket, &name, finder.as_deref(), family)?;
            trace!(interface = %name, "Bound to interface");
        }
        if self.mark != 0 {
            control::set_routing_mark(socket, self.mark)?;
        }
        Ok(())
    }

    /// Hand `socket` to the protect service, if one is configured
    ///
    /// The exchange is blocking Unix socket I/O, so it runs on the blocking
    /// pool. Call before connecting.
    pub async fn protect(&self, socket: Socket) -> Result<Socket> {
        let Some(path) = self.protect_path.clone() else {
            return Ok(socket);
        };
        let task_path = path.clone();
        tokio::task::spawn_blocking(move || control::protect(&socket, &task_path).map(|()| socket))
            .await
            .map_err(|e| PlatformError::Protect {
                path,
                reason: e.to_string(),
            })?
    }
}

fn unspecified(family: Family) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        Family::V6 | Family::Dual => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

fn bind(socket: &Socket, addr: SocketAddr) -> Result<()> {
    socket
        .bind(&SockAddr::from(addr))
        .map_err(|e| PlatformError::socket_option("bind", format!("{addr}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockRouterDefaults;
    use egress_core::options::TlsFragmentOptions;

    fn router(auto: bool, default: Option<&str>, mark: u32) -> MockRouterDefaults {
        let mut router = MockRouterDefaults::new();
        router.expect_auto_detect_interface().return_const(auto);
        router
            .expect_default_interface()
            .return_const(default.map(str::to_string));
        router.expect_default_mark().return_const(mark);
        router.expect_interface_finder().returning(|| None);
        router
    }

    #[test]
    fn test_interface_precedence() {
        let r = router(true, Some("eth1"), 0);
        assert_eq!(
            select_interface(Some("wg0"), Some(&r)),
            InterfaceBinding::Fixed("wg0".into())
        );
        assert_eq!(select_interface(None, Some(&r)), InterfaceBinding::AutoDetect);

        let r = router(false, Some("eth1"), 0);
        assert_eq!(
            select_interface(Some(""), Some(&r)),
            InterfaceBinding::Fixed("eth1".into())
        );

        let r = router(false, None, 0);
        assert_eq!(select_interface(None, Some(&r)), InterfaceBinding::Unbound);
        assert_eq!(select_interface(None, None), InterfaceBinding::Unbound);
    }

    #[test]
    fn test_explicit_interface_skips_router() {
        let mut r = MockRouterDefaults::new();
        r.expect_auto_detect_interface().never();
        r.expect_default_interface().never();
        assert_eq!(
            select_interface(Some("en0"), Some(&r)),
            InterfaceBinding::Fixed("en0".into())
        );
    }

    #[test]
    fn test_mark_precedence() {
        let r = router(false, None, 0x20);
        assert_eq!(select_mark(0x10, Some(&r)), 0x10);
        assert_eq!(select_mark(0, Some(&r)), 0x20);
        assert_eq!(select_mark(0, None), 0);
    }

    #[test]
    fn test_bind_addresses_per_family() {
        let options = DialerOptions {
            inet4_bind_address: Some(Ipv4Addr::LOCALHOST),
            inet6_bind_address: Some(Ipv6Addr::LOCALHOST),
            ..Default::default()
        };
        let binder = SocketBinder::new(&options, None).unwrap();

        let v4 = binder.dial_config(&"192.0.2.1:443".parse().unwrap());
        assert_eq!(v4.family, Family::V4);
        assert_eq!(v4.local_addr, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));

        let v6 = binder.dial_config(&"[2001:db8::1]:443".parse().unwrap());
        assert_eq!(v6.family, Family::V6);
        assert_eq!(v6.local_addr, Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));

        assert_eq!(binder.listen_config().inet4_addr, Some(Ipv4Addr::LOCALHOST));
        assert_eq!(binder.listen_config().inet6_addr, Some(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn test_tls_fragment_with_fast_open_rejected() {
        let options = DialerOptions {
            tcp_fast_open: true,
            tls_fragment: Some(TlsFragmentOptions {
                enabled: true,
                size: "10-20".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = SocketBinder::new(&options, None).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_multipath_support_checked() {
        let options = DialerOptions {
            tcp_multi_path: true,
            ..Default::default()
        };
        let result = SocketBinder::new(&options, None);
        if control::multipath_protocol().is_some() {
            assert!(result.unwrap().dial_config(&"192.0.2.1:80".parse().unwrap()).multipath);
        } else {
            assert!(matches!(result, Err(PlatformError::Unsupported("tcp_multi_path"))));
        }
    }

    #[test]
    fn test_defaults() {
        let binder = SocketBinder::new(&DialerOptions::default(), None).unwrap();
        assert_eq!(binder.interface(), &InterfaceBinding::Unbound);
        assert_eq!(binder.mark(), 0);
        assert!(!binder.udp_fragment_allowed());
        assert_eq!(
            binder.connect_timeout(),
            egress_core::options::DEFAULT_CONNECT_TIMEOUT
        );
    }

    #[test]
    fn test_sockets_bind_local_address() {
        let options = DialerOptions {
            inet4_bind_address: Some(Ipv4Addr::LOCALHOST),
            ..Default::default()
        };
        let binder = SocketBinder::new(&options, None).unwrap();

        let tcp = binder.tcp_socket("127.0.0.1:9".parse().unwrap()).unwrap();
        let local = tcp.local_addr().unwrap().as_socket().unwrap();
        assert_eq!(local.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(tcp.keepalive().unwrap());

        let udp = binder.udp_socket("127.0.0.1:9".parse().unwrap()).unwrap();
        let local = udp.local_addr().unwrap().as_socket().unwrap();
        assert_eq!(local.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "current_thread")]
    async fn test_protect_keeps_runtime_responsive() {
        use std::io::{Read, Write};
        use std::os::unix::net::UnixListener;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let path = std::env::temp_dir().join(format!("egress-binder-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        let service = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1];
            conn.read_exact(&mut buf).unwrap();
            std::thread::sleep(Duration::from_millis(200));
            conn.write_all(&[0]).unwrap();
        });

        let options = DialerOptions {
            protect_path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let binder = SocketBinder::new(&options, None).unwrap();
        let socket = binder.tcp_socket("127.0.0.1:9".parse().unwrap()).unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        binder.protect(socket).await.unwrap();
        ticker.abort();
        service.join().unwrap();
        let _ = std::fs::remove_file(&path);
        // The single runtime thread kept running while the service stalled.
        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn test_protect_without_path_is_noop() {
        let binder = SocketBinder::new(&DialerOptions::default(), None).unwrap();
        let socket = binder.udp_socket("127.0.0.1:53".parse().unwrap()).unwrap();
        binder.protect(socket).await.unwrap();
    }

    #[test]
    fn test_auto_detect_asks_router_per_destination() {
        let mut r = router(true, None, 0);
        r.expect_detected_interface().times(1).returning(|_| None);
        let binder = SocketBinder::new(&DialerOptions::default(), Some(Arc::new(r))).unwrap();
        assert_eq!(binder.interface(), &InterfaceBinding::AutoDetect);
        binder.udp_socket("127.0.0.1:53".parse().unwrap()).unwrap();
    }
}
