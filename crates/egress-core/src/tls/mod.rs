//! TLS ClientHello fragmentation
//!
//! [`FragmentConn`] wraps a stream and splits the first handshake record
//! into several smaller TLS records so that middleboxes matching on a
//! single record never see the whole ClientHello (or the whole SNI).

mod conn;
pub mod plan;
pub mod record;
mod tricks;

pub use conn::FragmentConn;
pub use tricks::{hostname_in_sni, padding_extension, randomize_case, zero_padding_extension, PaddingMode, TlsTricks};

use crate::error::{Error, Result};
use crate::options::TlsFragmentOptions;
use crate::range::Range;

/// Parsed, immutable fragmentation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFragmentPolicy {
    /// Chunk size in bytes
    pub size: Range,
    /// Pause between records in milliseconds
    pub sleep: Range,
    /// Put one cut inside the SNI host name
    pub sni_split: bool,
}

impl TlsFragmentPolicy {
    /// Build from options, failing on malformed ranges
    pub fn from_options(options: &TlsFragmentOptions) -> Result<Self> {
        let size = Range::parse(&options.size).map_err(|e| e.for_key("tls_fragment.size"))?;
        if size.is_zero() {
            return Err(Error::config_value("tls_fragment.size", "fragment size must be non-zero"));
        }

        let sleep = if options.sleep.is_empty() {
            Range::default()
        } else {
            Range::parse(&options.sleep).map_err(|e| e.for_key("tls_fragment.sleep"))?
        };

        Ok(Self {
            size,
            sleep,
            sni_split: options.sni_split,
        })
    }

    /// Policy from options, `None` when fragmentation is disabled
    pub fn from_enabled(options: Option<&TlsFragmentOptions>) -> Result<Option<Self>> {
        match options {
            Some(opts) if opts.enabled => Self::from_options(opts).map(Some),
            _ => Ok(None),
        }
    }
}
