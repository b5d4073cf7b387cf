//! Fake-packet modes
//!
//! A mode fixes two things: the pool of leading bytes used for filler
//! packets, and whether real packets get their leading byte rewritten.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

const M3_M4_HEADER: &[u8] = &[0xDC, 0xDE, 0xD3, 0xD9, 0xD0, 0xEC, 0xEE, 0xE3];
const M5_HEADER: &[u8] = &[0xC0, 0xC2, 0xC3, 0xC4, 0xC9, 0xCB, 0xCC, 0xCD, 0xCE, 0xCF];
const M6_HEADER: &[u8] = &[0x40, 0x42, 0x43, 0x44, 0x49, 0x4B, 0x4C, 0x4D, 0x4E, 0x4F];

/// Built-in modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedMode {
    /// Random leading bytes, real packets modified
    M1,
    /// Random leading bytes, real packets untouched
    M2,
    /// STUN/QUIC-like bytes, real packets modified
    M3,
    /// STUN/QUIC-like bytes, real packets untouched
    M4,
    /// QUIC long-header bytes, real packets modified
    M5,
    /// QUIC short-header bytes, real packets untouched
    M6,
}

impl NamedMode {
    fn header(self) -> &'static [u8] {
        match self {
            Self::M1 | Self::M2 => &[],
            Self::M3 | Self::M4 => M3_M4_HEADER,
            Self::M5 => M5_HEADER,
            Self::M6 => M6_HEADER,
        }
    }

    fn modifies(self) -> bool {
        matches!(self, Self::M1 | Self::M3 | Self::M5)
    }

    fn name(self) -> &'static str {
        match self {
            Self::M1 => "m1",
            Self::M2 => "m2",
            Self::M3 => "m3",
            Self::M4 => "m4",
            Self::M5 => "m5",
            Self::M6 => "m6",
        }
    }
}

/// How filler and real packets are disguised
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FakePacketMode {
    /// One of `m1`..`m6`
    Named(NamedMode),
    /// `h<hex>` (no modify) or `g<hex>` (modify)
    CustomHeader {
        /// Candidate leading bytes
        header: Vec<u8>,
        /// Rewrite real packets too
        modify: bool,
    },
}

impl Default for FakePacketMode {
    fn default() -> Self {
        Self::Named(NamedMode::M1)
    }
}

impl FakePacketMode {
    /// Parse a mode string (case-insensitive, empty means `m1`)
    pub fn parse(mode: &str) -> Result<Self> {
        let lower = mode.to_ascii_lowercase();
        let named = match lower.as_str() {
            "" | "m1" => Some(NamedMode::M1),
            "m2" => Some(NamedMode::M2),
            "m3" => Some(NamedMode::M3),
            "m4" => Some(NamedMode::M4),
            "m5" => Some(NamedMode::M5),
            "m6" => Some(NamedMode::M6),
            _ => None,
        };
        if let Some(named) = named {
            return Ok(Self::Named(named));
        }

        let modify = match lower.as_bytes().first() {
            Some(b'h') => false,
            Some(b'g') => true,
            _ => {
                return Err(Error::InvalidFakePacketMode {
                    mode: mode.to_string(),
                    reason: "expected m1-m6, h<hex> or g<hex>".to_string(),
                })
            }
        };
        let digits = lower[1..].replace('_', "");
        let header = hex::decode(&digits).map_err(|e| Error::InvalidFakePacketMode {
            mode: mode.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self::CustomHeader { header, modify })
    }

    /// Pool of leading bytes; empty means fully random
    pub fn header(&self) -> &[u8] {
        match self {
            Self::Named(named) => named.header(),
            Self::CustomHeader { header, .. } => header,
        }
    }

    /// Whether real packets get their leading byte rewritten
    pub fn modifies_packets(&self) -> bool {
        match self {
            Self::Named(named) => named.modifies(),
            Self::CustomHeader { modify, .. } => *modify,
        }
    }
}

impl FromStr for FakePacketMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for FakePacketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(named) => f.write_str(named.name()),
            Self::CustomHeader { header, modify } => {
                let prefix = if *modify { 'g' } else { 'h' };
                write!(f, "{prefix}{}", hex::encode(header))
            }
        }
    }
}
