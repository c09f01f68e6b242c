//! Host filter that keeps a log of ban calls.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use kadstore_db::HostFilter;
use parking_lot::Mutex;

/// Host filter that logs every `ban` call.
///
/// In enforcing mode banned hosts are rejected afterwards; otherwise every
/// host stays allowed so a test can count ban calls on its own.
#[derive(Debug, Default)]
pub struct RecordingFilter {
    enforce: bool,
    calls: Mutex<Vec<SocketAddr>>,
    banned: Mutex<HashSet<IpAddr>>,
}

impl RecordingFilter {
    /// Creates a filter that records bans but never rejects.
    pub fn recording() -> Self {
        Self::default()
    }

    /// Creates a filter that records bans and rejects banned hosts.
    pub fn enforcing() -> Self {
        Self {
            enforce: true,
            ..Self::default()
        }
    }

    /// Returns every ban call in order.
    pub fn ban_calls(&self) -> Vec<SocketAddr> {
        self.calls.lock().clone()
    }

    /// Returns how many times the host of `addr` was banned.
    pub fn bans_for(&self, addr: &SocketAddr) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.ip() == addr.ip())
            .count()
    }
}

impl HostFilter for RecordingFilter {
    fn allow(&self, addr: &SocketAddr) -> bool {
        !self.enforce || !self.banned.lock().contains(&addr.ip())
    }

    fn ban(&self, addr: &SocketAddr) {
        self.calls.lock().push(*addr);
        self.banned.lock().insert(addr.ip());
    }
}
