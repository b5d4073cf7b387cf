//! ClientHello shaping helpers for an external TLS builder

use super::record::EXTENSION_PADDING;
use crate::error::{Error, Result};
use crate::options::TlsTricksOptions;
use crate::range::Range;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use std::net::IpAddr;

/// Host name suitable for the SNI extension, if any
///
/// IP literals (bracketed, zoned or plain) never go into SNI.
pub fn hostname_in_sni(name: &str) -> Option<String> {
    let mut host = name;
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        host = inner;
    }
    let unzoned = host.split_once('%').map_or(host, |(addr, _zone)| addr);
    if unzoned.parse::<IpAddr>().is_ok() {
        return None;
    }

    let trimmed = host.trim_end_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// Flip the case of each ASCII letter with probability one half
pub fn randomize_case(name: &str) -> String {
    let mut rng = OsRng;
    name.chars()
        .map(|c| {
            if c.is_ascii_alphabetic() && rng.gen_bool(0.5) {
                if c.is_ascii_uppercase() {
                    c.to_ascii_lowercase()
                } else {
                    c.to_ascii_uppercase()
                }
            } else {
                c
            }
        })
        .collect()
}

/// padding extension (0x0015) with a random body of `len` bytes
pub fn padding_extension(len: usize) -> Vec<u8> {
    let mut ext = padding_header(len);
    let start = ext.len();
    ext.resize(start + len, 0);
    OsRng.fill_bytes(&mut ext[start..]);
    ext
}

/// padding extension (0x0015) with an all-zero body as RFC 7685 describes
pub fn zero_padding_extension(len: usize) -> Vec<u8> {
    let mut ext = padding_header(len);
    ext.resize(ext.len() + len, 0);
    ext
}

fn padding_header(len: usize) -> Vec<u8> {
    let len = u16::try_from(len).unwrap_or(u16::MAX);
    let mut ext = Vec::with_capacity(4 + usize::from(len));
    ext.extend_from_slice(&EXTENSION_PADDING.to_be_bytes());
    ext.extend_from_slice(&len.to_be_bytes());
    ext
}

/// How padding bytes are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    /// Random body
    Random,
    /// Zero body
    HelloPadding,
}

impl PaddingMode {
    fn parse(mode: &str) -> Result<Self> {
        match mode {
            "" | "random" => Ok(Self::Random),
            "hello_padding" => Ok(Self::HelloPadding),
            other => Err(Error::config_value(
                "tls_tricks.padding_mode",
                format!("unknown padding mode '{other}'"),
            )),
        }
    }
}

/// Parsed ClientHello shaping settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsTricks {
    /// Randomize SNI letter case
    pub mixed_case_sni: bool,
    /// Padding generator and length, when padding is on
    pub padding: Option<(PaddingMode, Range)>,
    /// Decoy host name carried in the padding
    pub padding_sni: Option<String>,
}

impl TlsTricks {
    /// Build from options
    pub fn from_options(options: &TlsTricksOptions) -> Result<Self> {
        let padding = if options.padding_size.is_empty() {
            None
        } else {
            let size = Range::parse(&options.padding_size)
                .map_err(|e| e.for_key("tls_tricks.padding_size"))?;
            if size.max() > u64::from(u16::MAX) {
                return Err(Error::config_value(
                    "tls_tricks.padding_size",
                    "padding must fit in a TLS extension",
                ));
            }
            Some((PaddingMode::parse(&options.padding_mode)?, size))
        };

        let padding_sni = match options.padding_sni.as_str() {
            "" => None,
            name => Some(hostname_in_sni(name).ok_or_else(|| {
                Error::config_value("tls_tricks.padding_sni", "padding SNI must be a host name")
            })?),
        };

        Ok(Self {
            mixed_case_sni: options.mixedcase_sni,
            padding,
            padding_sni,
        })
    }

    /// SNI value to send for `server_name`
    pub fn server_name(&self, server_name: &str) -> Option<String> {
        let host = hostname_in_sni(server_name)?;
        if self.mixed_case_sni {
            Some(randomize_case(&host))
        } else {
            Some(host)
        }
    }

    /// A freshly sampled padding extension
    pub fn padding(&self) -> Option<Vec<u8>> {
        let (mode, size) = self.padding?;
        let len = size.sample_usize();
        Some(match mode {
            PaddingMode::Random => padding_extension(len),
            PaddingMode::HelloPadding => zero_padding_extension(len),
        })
    }
}
