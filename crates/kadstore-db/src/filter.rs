//! Source address filtering.
//!
//! The database asks a [`HostFilter`] about every store before it looks at
//! any stored state, and tells it to ban sources that flood the store.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use parking_lot::RwLock;
use tracing::info;

/// Address-based admission gate.
///
/// Neither method is called with the database lock held, so a filter may
/// block on I/O or query the database.
pub trait HostFilter: Send + Sync {
    /// Returns true if requests from `addr` may be processed.
    fn allow(&self, addr: &SocketAddr) -> bool;

    /// Rejects all future requests from `addr`.
    fn ban(&self, addr: &SocketAddr);
}

/// Filter that allows every host and ignores bans.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl HostFilter for AllowAll {
    fn allow(&self, _addr: &SocketAddr) -> bool {
        true
    }

    fn ban(&self, _addr: &SocketAddr) {}
}

/// In-memory ban list keyed by IP address.
///
/// Bans apply to every port of the banned host.
#[derive(Debug, Default)]
pub struct BanList {
    banned: RwLock<HashSet<IpAddr>>,
}

impl BanList {
    /// Creates an empty ban list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the host is banned.
    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.banned.read().contains(ip)
    }

    /// Lifts a ban. Returns true if the host was banned.
    pub fn unban(&self, ip: &IpAddr) -> bool {
        self.banned.write().remove(ip)
    }

    /// Returns the number of banned hosts.
    pub fn len(&self) -> usize {
        self.banned.read().len()
    }

    /// Returns true if no host is banned.
    pub fn is_empty(&self) -> bool {
        self.banned.read().is_empty()
    }
}

impl HostFilter for BanList {
    fn allow(&self, addr: &SocketAddr) -> bool {
        !self.is_banned(&addr.ip())
    }

    fn ban(&self, addr: &SocketAddr) {
        if self.banned.write().insert(addr.ip()) {
            info!(host = %addr.ip(), "Host banned");
        }
    }
}
