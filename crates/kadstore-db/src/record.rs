//! Stored value records.
//!
//! A [`ValueRecord`] couples an immutable identity (key, creator, sender,
//! payload) with the small amount of mutable state the republish scheduler
//! needs. Records are shared as `Arc<ValueRecord>`: the database and any
//! snapshot handed out by [`crate::Database::values`] point at the same
//! publish state.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use kadstore_core::{NodeId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::RepublishConfig;

/// Where a record came from, ranked by trust.
///
/// Computed once at construction. A record may only replace another record
/// of equal or lower rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Forwarded by a third party on behalf of the creator.
    Indirect,
    /// Delivered by the creator itself.
    Direct,
    /// Originated by this node.
    Local,
}

impl Provenance {
    /// Derives the provenance from the record's identities.
    pub fn classify(creator: &NodeId, sender: &NodeId, local: bool) -> Self {
        if local {
            Provenance::Local
        } else if creator == sender {
            Provenance::Direct
        } else {
            Provenance::Indirect
        }
    }
}

/// Four-character tag naming the payload format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ValueType(pub u32);

impl ValueType {
    /// Opaque binary payload.
    pub const BINARY: ValueType = ValueType::from_tag(*b"BINA");
    /// UTF-8 text payload.
    pub const TEXT: ValueType = ValueType::from_tag(*b"TEXT");
    /// Payload used by tests and diagnostics.
    pub const TEST: ValueType = ValueType::from_tag(*b"TEST");
    /// Wildcard used when querying any type.
    pub const ANY: ValueType = ValueType::from_tag(*b"****");

    /// Builds a type from its four ASCII characters.
    pub const fn from_tag(tag: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(tag))
    }

    /// Returns the four tag characters.
    pub const fn tag(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueType({})", self)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.tag() {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

/// Republish bookkeeping.
#[derive(Debug, Default)]
struct PublishState {
    last_published: Option<Timestamp>,
    replica_count: usize,
}

/// One stored record.
#[derive(Debug)]
pub struct ValueRecord {
    key: NodeId,
    creator: NodeId,
    sender: NodeId,
    value_type: ValueType,
    version: u32,
    payload: Bytes,
    created_at: Timestamp,
    provenance: Provenance,
    source: Option<SocketAddr>,
    publish: Mutex<PublishState>,
}

impl ValueRecord {
    /// Creates a new record stamped with the current time.
    pub fn new(
        key: NodeId,
        creator: NodeId,
        sender: NodeId,
        value_type: ValueType,
        version: u32,
        payload: impl Into<Bytes>,
        local: bool,
    ) -> Self {
        Self {
            key,
            creator,
            sender,
            value_type,
            version,
            payload: payload.into(),
            created_at: Timestamp::now(),
            provenance: Provenance::classify(&creator, &sender, local),
            source: None,
            publish: Mutex::new(PublishState::default()),
        }
    }

    /// Creates a record originated by this node.
    pub fn local(
        key: NodeId,
        local_id: NodeId,
        value_type: ValueType,
        version: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::new(key, local_id, local_id, value_type, version, payload, true)
    }

    /// Creates a record received from the network.
    pub fn remote(
        key: NodeId,
        creator: NodeId,
        sender: NodeId,
        value_type: ValueType,
        version: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::new(key, creator, sender, value_type, version, payload, false)
    }

    /// Overrides the creation time.
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    pub(crate) fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = Some(source);
        self
    }

    /// Returns the key this record is stored under.
    pub fn key(&self) -> &NodeId {
        &self.key
    }

    /// Returns the originating node.
    pub fn creator(&self) -> &NodeId {
        &self.creator
    }

    /// Returns the node that delivered the record.
    pub fn sender(&self) -> &NodeId {
        &self.sender
    }

    /// Returns the payload type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Returns the payload version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the creation time.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns the provenance rank.
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Returns the network address the record was admitted from, if any.
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// Returns true if the creator delivered the record itself.
    ///
    /// Derived from the identities alone; a local record relayed through
    /// another sender is local but not direct.
    pub fn is_direct(&self) -> bool {
        self.creator == self.sender
    }

    /// Returns true if this node originated the record.
    pub fn is_local_value(&self) -> bool {
        self.provenance == Provenance::Local
    }

    /// Returns true if the payload is empty, which signals removal.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns true if the record should be announced to the network again.
    ///
    /// Only local records are republished. A record that has never been
    /// published is always due.
    pub fn requires_republish(&self, now: Timestamp, config: &RepublishConfig) -> bool {
        if !self.is_local_value() {
            return false;
        }

        let state = self.publish.lock();
        match state.last_published {
            None => true,
            Some(last) => {
                let interval = config.interval_for(state.replica_count);
                now >= last.add(interval)
            }
        }
    }

    /// Records how many peers acknowledged the last publish.
    pub fn record_replica_count(&self, replica_count: usize) {
        self.record_replica_count_at(replica_count, Timestamp::now());
    }

    /// Records how many peers acknowledged a publish that completed at `now`.
    pub fn record_replica_count_at(&self, replica_count: usize, now: Timestamp) {
        let mut state = self.publish.lock();
        state.replica_count = replica_count;
        state.last_published = Some(now);
    }

    /// Returns the number of peers holding the record after the last publish.
    pub fn replica_count(&self) -> usize {
        self.publish.lock().replica_count
    }

    /// Returns when the record was last published.
    pub fn last_published(&self) -> Option<Timestamp> {
        self.publish.lock().last_published
    }

    /// Returns true if a non-local record has outlived `expiration`.
    pub fn is_expired(&self, now: Timestamp, expiration: Duration) -> bool {
        !self.is_local_value() && now >= self.created_at.add(expiration)
    }
}

impl fmt::Display for ValueRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} by {} via {} ({:?}, {}, {} bytes)",
            self.key,
            self.creator,
            self.sender,
            self.provenance,
            self.value_type,
            self.payload.len()
        )
    }
}

/// A decoded store or remove request from the RPC layer.
///
/// A remove is a request with an empty payload.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// Key to store under
    pub key: NodeId,
    /// Originating node
    pub creator: NodeId,
    /// Node that delivered the request
    pub sender: NodeId,
    /// Transport address the request arrived from
    pub source: SocketAddr,
    /// Payload type
    pub value_type: ValueType,
    /// Payload version
    pub version: u32,
    /// Payload, empty for removals
    pub payload: Bytes,
    /// Set when this node originated the request
    pub local: bool,
}

impl StoreRequest {
    /// Converts the request into a record tagged with its source address.
    pub fn into_record(self) -> ValueRecord {
        ValueRecord::new(
            self.key,
            self.creator,
            self.sender,
            self.value_type,
            self.version,
            self.payload,
            self.local,
        )
        .with_source(self.source)
    }
}
