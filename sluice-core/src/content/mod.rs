//! Content identifiers and identifier-bearing descriptors

pub mod descriptor;

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

pub use descriptor::{ContentDescriptor, DescriptorError};

/// Length of a content identifier in hex characters.
pub const CONTENT_ID_HEX_LEN: usize = 40;

/// 20-byte identifier naming a content pack.
///
/// Parsed from exactly 40 hex characters in either case. Always rendered
/// as lowercase hex, so two spellings of the same identifier compare and
/// hash equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; 20]);

impl ContentId {
    /// Creates identifier from raw 20-byte hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40-character hex string.
    ///
    /// # Errors
    /// - `DescriptorError::InvalidLength` - Not exactly 40 characters
    /// - `DescriptorError::InvalidHex` - Non-hex character present
    pub fn from_hex(hex_str: &str) -> Result<Self, DescriptorError> {
        if hex_str.len() != CONTENT_ID_HEX_LEN {
            return Err(DescriptorError::InvalidLength {
                length: hex_str.len(),
            });
        }

        let mut hash = [0u8; 20];
        hex::decode_to_slice(hex_str, &mut hash).map_err(|_| DescriptorError::InvalidHex {
            value: hex_str.to_string(),
        })?;
        Ok(Self(hash))
    }

    /// Short prefix used in log lines and fallback names.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ContentId {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s.trim())
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
