//! Sortable 128-bit block identifiers
//!
//! A block id is a ULID: 26 characters of Crockford base32 whose top 48 bits
//! hold a millisecond Unix timestamp and whose low 80 bits hold entropy
//! chosen by the producer, so identifiers sort by creation time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;
use ulid::{DecodeError, Ulid};

/// Length of the canonical text form
pub const ENCODED_LEN: usize = 26;

/// Errors produced while parsing a [`BlockId`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("expected 26 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid character {0:?}")]
    InvalidChar(char),

    #[error("value does not fit in 128 bits")]
    Overflow,
}

/// Identifier of a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(Ulid);

impl BlockId {
    /// Build an identifier from a millisecond timestamp and 80 bits of entropy
    ///
    /// Timestamp bits above 48 and entropy bits above 80 are discarded.
    pub fn from_parts(timestamp_ms: u64, entropy: u128) -> Self {
        Self(Ulid::from_parts(timestamp_ms, entropy))
    }

    /// Build an identifier stamped with the given time
    ///
    /// Returns `None` for times before the Unix epoch, which the id format
    /// cannot represent.
    pub fn at(time: DateTime<Utc>, entropy: u128) -> Option<Self> {
        let ms = u64::try_from(time.timestamp_millis()).ok()?;
        Some(Self::from_parts(ms, entropy))
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Ulid(value))
    }

    pub const fn as_u128(&self) -> u128 {
        self.0 .0
    }

    /// Creation time in milliseconds since the Unix epoch
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }

    /// Creation time as a UTC date
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        let ms = i64::try_from(self.timestamp_ms()).ok()?;
        Utc.timestamp_millis_opt(ms).single()
    }

    pub fn entropy(&self) -> u128 {
        self.0.random()
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self(Ulid::nil())
    }
}

impl From<Ulid> for BlockId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl From<BlockId> for Ulid {
    fn from(id: BlockId) -> Self {
        id.0
    }
}

fn is_base32(c: char) -> bool {
    c.is_ascii_alphanumeric() && !matches!(c.to_ascii_uppercase(), 'I' | 'L' | 'O' | 'U')
}

impl FromStr for BlockId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ENCODED_LEN {
            return Err(ParseIdError::InvalidLength(s.len()));
        }

        if let Some(c) = s.chars().find(|&c| !is_base32(c)) {
            return Err(ParseIdError::InvalidChar(c));
        }
        // The leading character only carries 3 bits.
        if !matches!(s.as_bytes()[0], b'0'..=b'7') {
            return Err(ParseIdError::Overflow);
        }

        Ulid::from_string(&s.to_ascii_uppercase())
            .map(Self)
            .map_err(|e| match e {
                DecodeError::InvalidChar => ParseIdError::InvalidChar('?'),
                _ => ParseIdError::InvalidLength(s.len()),
            })
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
