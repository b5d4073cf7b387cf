//! Inclusive integer ranges drawn with a cryptographic RNG
//!
//! Every randomized size or delay in this crate comes from a [`Range`]
//! parsed from the `"N"` or `"N-M"` configuration form.

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const SEPARATOR: char = '-';

/// Inclusive interval `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Range {
    min: u64,
    max: u64,
}

impl Range {
    /// Create a range, failing when `max < min`
    pub fn new(min: u64, max: u64) -> Result<Self> {
        if max < min {
            return Err(Error::invalid_range(
                format!("{min}-{max}"),
                format!("upper bound value ({max}) must be greater than or equal to lower bound value ({min})"),
            ));
        }
        Ok(Self { min, max })
    }

    /// Range over two bounds given in either order
    pub const fn from_bounds(a: u64, b: u64) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    /// A degenerate range that always yields `value`
    pub const fn fixed(value: u64) -> Self {
        Self { min: value, max: value }
    }

    /// Parse `"N"` or `"N-M"`
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(Error::invalid_range(text, "empty input"));
        }

        let mut tokens = text.split(SEPARATOR);
        let min = parse_bound(text, tokens.next())?;
        let max = match tokens.next() {
            Some(token) => parse_bound(text, Some(token))?,
            None => min,
        };
        if tokens.next().is_some() {
            return Err(Error::invalid_range(text, "expected \"N\" or \"N-M\""));
        }

        Self::new(min, max).map_err(|err| match err {
            Error::InvalidRange { reason, .. } => Error::invalid_range(text, reason),
            other => other,
        })
    }

    /// Lower bound
    pub fn min(&self) -> u64 {
        self.min
    }

    /// Upper bound (inclusive)
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Whether the range can only yield zero
    pub fn is_zero(&self) -> bool {
        self.max == 0
    }

    /// Whether `value` lies inside the range
    pub fn contains(&self, value: u64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// Draw a value uniformly from `[min, max]`
    ///
    /// Degenerate ranges return their bound without touching the RNG.
    pub fn sample(&self) -> u64 {
        if self.min == self.max {
            return self.min;
        }
        OsRng.gen_range(self.min..=self.max)
    }

    /// Draw a value and clamp it into `usize`
    pub fn sample_usize(&self) -> usize {
        usize::try_from(self.sample()).unwrap_or(usize::MAX)
    }

    /// Draw a value interpreted as milliseconds
    pub fn sample_duration_ms(&self) -> Duration {
        Duration::from_millis(self.sample())
    }
}

fn parse_bound(input: &str, token: Option<&str>) -> Result<u64> {
    let token = token.unwrap_or_default();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid_range(
            input,
            format!("'{token}' is not a non-negative integer"),
        ));
    }
    token
        .parse::<u64>()
        .map_err(|e| Error::invalid_range(input, format!("'{token}': {e}")))
}

impl FromStr for Range {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}{SEPARATOR}{}", self.min, self.max)
        }
    }
}

impl Serialize for Range {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Range {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
