//! # Egress Core
//!
//! Platform-independent outbound connection shaping.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Range sampling** - `"N"` / `"N-M"` intervals drawn from the OS RNG
//! - **TLS fragmentation** - ClientHello splitting with SNI-aligned cuts
//! - **WireGuard obfuscation** - filler packets and header disguise
//! - **TURN relay** - local UDP bridge through a TURN allocation
//! - **Dial contract** - the `Dialer` / `PacketListener` traits outbounds consume
//!
//! ## Example
//!
//! ```rust,no_run
//! use egress_core::options::TlsFragmentOptions;
//! use egress_core::tls::{FragmentConn, TlsFragmentPolicy};
//!
//! # async fn run(stream: tokio::net::TcpStream) -> egress_core::Result<()> {
//! let policy = TlsFragmentPolicy::from_options(&TlsFragmentOptions {
//!     enabled: true,
//!     size: "10-30".into(),
//!     sleep: "2-8".into(),
//!     ..Default::default()
//! })?;
//! let conn = FragmentConn::new(stream, policy);
//! // run the TLS handshake over `conn`
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod conntrack;
pub mod dialer;
pub mod error;
pub mod options;
pub mod pause;
pub mod range;
pub mod tls;
pub mod turn;
pub mod wireguard;

// Re-exports for convenience
pub use dialer::{
    AsyncStream, BoxedStream, DatagramConn, Dialer, Network, OutboundConn, PacketListener,
};
pub use error::{Error, Result};
pub use range::Range;
