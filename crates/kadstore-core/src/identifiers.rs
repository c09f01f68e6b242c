//! Kademlia identifier type.
//!
//! A single 160-bit identifier names both nodes and stored values:
//! - value keys (the slot a record is stored under)
//! - creator identities (the node that originated a record)
//! - sender identities (the node that delivered a store request)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Length of a [`NodeId`] in bytes (160 bits).
pub const ID_LENGTH: usize = 20;

/// Error returned when parsing an identifier from hex.
pub type IdParseError = hex::FromHexError;

/// Fixed-width Kademlia identifier.
///
/// Comparable and hashable so it can key the value database directly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub [u8; ID_LENGTH]);

impl NodeId {
    /// Creates a new identifier from raw bytes.
    pub const fn new(bytes: [u8; ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Generates a random identifier.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; ID_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the inner bytes.
    pub const fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    /// Returns the full identifier as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for NodeId {
    type Err = IdParseError;

    /// Parses the 40-character hex form produced by [`NodeId::to_hex`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        <[u8; ID_LENGTH]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| hex::FromHexError::InvalidStringLength)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl From<[u8; ID_LENGTH]> for NodeId {
    fn from(bytes: [u8; ID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl From<NodeId> for [u8; ID_LENGTH] {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
