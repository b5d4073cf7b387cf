//! Outbound option structs
//!
//! These mirror the JSON configuration surface. Every struct is
//! `#[serde(default)]` so partial documents deserialize, and policies are
//! parsed out of them once at outbound construction.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// TCP connect timeout used when none is configured
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keep-alive idle time before the first probe
pub const KEEPALIVE_INITIAL: Duration = Duration::from_secs(10 * 60);

/// Interval between keep-alive probes
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(75);

/// Dialer options shared by every outbound
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerOptions {
    /// Network interface to bind outgoing sockets to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_interface: Option<String>,
    /// Local IPv4 address for outgoing sockets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inet4_bind_address: Option<Ipv4Addr>,
    /// Local IPv6 address for outgoing sockets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inet6_bind_address: Option<Ipv6Addr>,
    /// Linux `SO_MARK` routing mark (0 = unset)
    pub routing_mark: u32,
    /// Set `SO_REUSEADDR`
    pub reuse_addr: bool,
    /// Unix socket path of an Android-style protect service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protect_path: Option<String>,
    /// Connect timeout in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    /// Enable TCP fast open
    pub tcp_fast_open: bool,
    /// Enable multipath TCP
    pub tcp_multi_path: bool,
    /// Explicit UDP fragmentation switch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_fragment: Option<bool>,
    /// Fallback used when `udp_fragment` is unset
    pub udp_fragment_default: bool,
    /// TLS ClientHello fragmentation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_fragment: Option<TlsFragmentOptions>,
    /// Local tunnel wrapping
    pub tunnel: TunnelOptions,
    /// Listen sockets belong to WireGuard; run registered WireGuard controls
    pub is_wireguard_listener: bool,
}

impl DialerOptions {
    /// Effective connect timeout
    pub fn connect_timeout(&self) -> Duration {
        match self.connect_timeout_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Whether UDP fragmentation stays allowed
    pub fn udp_fragment_allowed(&self) -> bool {
        self.udp_fragment.unwrap_or(self.udp_fragment_default)
    }

    /// Whether TLS fragmentation is switched on
    pub fn tls_fragment_enabled(&self) -> bool {
        self.tls_fragment.as_ref().is_some_and(|tf| tf.enabled)
    }

    /// Validate option combinations that do not depend on the platform
    pub fn validate(&self) -> Result<()> {
        if self.tls_fragment_enabled() && self.tcp_fast_open {
            return Err(Error::config_value(
                "tls_fragment",
                "TLS fragmentation is not compatible with TCP fast open",
            ));
        }

        if let Some(tf) = &self.tls_fragment {
            tf.validate()?;
        }

        if self.tunnel.enabled {
            self.tunnel.validate()?;
        }

        Ok(())
    }
}

/// TLS ClientHello fragmentation options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsFragmentOptions {
    /// Enable fragmentation
    pub enabled: bool,
    /// Chunk size range, `"N"` or `"N-M"` bytes
    pub size: String,
    /// Sleep between records, `"N"` or `"N-M"` milliseconds
    pub sleep: String,
    /// Align one cut inside the SNI host name
    pub sni_split: bool,
}

impl Default for TlsFragmentOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            size: String::new(),
            sleep: String::new(),
            sni_split: true,
        }
    }
}

impl TlsFragmentOptions {
    /// Validate the range strings
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        crate::tls::TlsFragmentPolicy::from_options(self).map(|_| ())
    }
}

/// WireGuard fake-packet obfuscation options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireGuardObfsOptions {
    /// Filler packets per handshake, `"N"` or `"N-M"`; empty disables
    pub fake_packets: String,
    /// Filler packet size in bytes
    pub fake_packets_size: String,
    /// Delay between filler packets in milliseconds
    pub fake_packets_delay: String,
    /// `m1`..`m6`, `h<hex>` or `g<hex>`
    pub fake_packets_mode: String,
}

/// A remote `server:port` pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Host name or IP literal
    pub server: String,
    /// Port
    pub server_port: u16,
}

impl ServerOptions {
    /// Create from host and port
    pub fn new(server: impl Into<String>, server_port: u16) -> Self {
        Self {
            server: server.into(),
            server_port,
        }
    }

    /// `host:port` with IPv6 literals bracketed
    pub fn address(&self) -> String {
        match self.server.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]:{}", self.server_port),
            _ => format!("{}:{}", self.server, self.server_port),
        }
    }

    /// Whether a server is configured at all
    pub fn is_set(&self) -> bool {
        !self.server.is_empty()
    }
}

/// TURN relay options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnRelayOptions {
    /// TURN server
    #[serde(flatten)]
    pub server: ServerOptions,
    /// Long-term credential user name
    pub username: String,
    /// Long-term credential password
    pub password: String,
    /// Authentication realm
    pub realm: String,
}

impl TurnRelayOptions {
    /// Validate that a server is present
    pub fn validate(&self) -> Result<()> {
        if !self.server.is_set() {
            return Err(Error::config_value("turn_relay.server", "missing TURN server"));
        }
        if self.server.server_port == 0 {
            return Err(Error::config_value("turn_relay.server_port", "port must be non-zero"));
        }
        Ok(())
    }
}

/// Local tunnel wrapping options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelOptions {
    /// Enable tunnel wrapping
    pub enabled: bool,
    /// HTTP path used by the tunnel
    pub path: String,
    /// Host header
    pub host: String,
    /// TLS server name
    pub server_name: String,
    /// Skip certificate verification
    pub insecure: bool,
    /// Tunnel endpoint
    pub target: String,
}

impl TunnelOptions {
    /// Validate the tunnel endpoint
    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(Error::config_value("tunnel.target", "missing tunnel target"));
        }
        Ok(())
    }
}

/// ClientHello shaping helpers consumed by an external TLS builder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsTricksOptions {
    /// Randomize SNI letter case
    pub mixedcase_sni: bool,
    /// Padding mode (`random`, `hello_padding` or empty)
    pub padding_mode: String,
    /// Padding length range
    pub padding_size: String,
    /// Decoy SNI appended as padding
    pub padding_sni: String,
}
