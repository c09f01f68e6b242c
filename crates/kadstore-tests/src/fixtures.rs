//! Record and address builders.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;
use kadstore_core::NodeId;
use kadstore_db::{ValueRecord, ValueType};

/// Returns the address `10.0.0.<host>:<port>`.
pub fn source(host: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)), port)
}

/// A record delivered by its creator.
pub fn direct(key: NodeId, creator: NodeId, payload: impl Into<Bytes>) -> ValueRecord {
    ValueRecord::remote(key, creator, creator, ValueType::TEST, 0, payload)
}

/// A record relayed by a node other than its creator.
pub fn indirect(key: NodeId, creator: NodeId, payload: impl Into<Bytes>) -> ValueRecord {
    ValueRecord::remote(key, creator, NodeId::random(), ValueType::TEST, 0, payload)
}

/// A record originated by `local_id`.
pub fn local(key: NodeId, local_id: NodeId, payload: impl Into<Bytes>) -> ValueRecord {
    ValueRecord::local(key, local_id, ValueType::TEST, 0, payload)
}

/// A direct removal of the creator's record.
pub fn removal(key: NodeId, creator: NodeId) -> ValueRecord {
    direct(key, creator, Bytes::new())
}
