//! Egress Platform Layer
//!
//! This crate turns outbound dial options into OS sockets and provides the
//! default [`Dialer`](egress_core::Dialer) implementation.
//!
//! ## Supported Platforms
//!
//! - **Linux / Android**: interface binding, `SO_MARK`, path MTU discovery,
//!   TCP fast open, multipath TCP, protect service
//! - **macOS / iOS**: interface binding by index, don't-fragment
//! - **Others**: keep-alive and address reuse only

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub use error::{PlatformError, Result};

mod control;
pub use control::{register_wireguard_control, ControlFn, Family};

pub mod binder;
pub use binder::{InterfaceBinding, SocketBinder};

pub mod dialer;
pub use dialer::DefaultDialer;

pub mod tunnel;
pub use tunnel::{TunnelConn, TunnelGuard};

// Collaborators supplied by the router
mod traits;
pub use traits::{InterfaceFinder, RouterDefaults, TunnelForwarder, TunnelHandle};
