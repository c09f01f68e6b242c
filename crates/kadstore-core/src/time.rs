//! Wall-clock timestamps.
//!
//! Record creation, publish bookkeeping and request-rate tracking all use
//! millisecond timestamps. Every time-dependent operation in the database
//! takes the current time as an argument so behavior is reproducible.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
///
/// Signed so that differences between two peers' clocks stay representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Wraps a millisecond count.
    pub const fn new(millis: i64) -> Self {
        Self(millis)
    }

    /// Reads the system clock. A clock set before the epoch reads as zero.
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| Self(saturating_millis(elapsed)))
            .unwrap_or_default()
    }

    /// Returns the raw millisecond count.
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns the timestamp `offset` later, saturating at `i64::MAX`.
    pub fn add(&self, offset: Duration) -> Self {
        Self(self.0.saturating_add(saturating_millis(offset)))
    }

    /// Returns the timestamp `offset` earlier, saturating at `i64::MIN`.
    pub fn sub(&self, offset: Duration) -> Self {
        Self(self.0.saturating_sub(saturating_millis(offset)))
    }

    /// Returns the signed number of seconds elapsed since `earlier`.
    ///
    /// Negative when `earlier` lies in the future (clock skew).
    pub fn secs_since(&self, earlier: &Timestamp) -> f32 {
        self.0.saturating_sub(earlier.0) as f32 / 1000.0
    }
}

fn saturating_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_recent() {
        // 2024-01-01T00:00:00Z
        assert!(Timestamp::now() > Timestamp::new(1_704_067_200_000));
    }

    #[test]
    fn test_offsets() {
        let published = Timestamp::new(3_600_000);
        let interval = Duration::from_secs(120);

        assert_eq!(published.add(interval), Timestamp::new(3_720_000));
        assert_eq!(published.sub(interval), Timestamp::new(3_480_000));
        assert!(published.add(interval) > published);
    }

    #[test]
    fn test_offsets_saturate() {
        let far = Timestamp::new(i64::MAX - 1);
        assert_eq!(far.add(Duration::from_secs(60)), Timestamp::new(i64::MAX));
        assert_eq!(far.add(Duration::MAX), Timestamp::new(i64::MAX));
    }

    #[test]
    fn test_secs_since_is_signed() {
        let first = Timestamp::new(10_000);
        let second = Timestamp::new(10_500);

        assert_eq!(second.secs_since(&first), 0.5);
        assert_eq!(first.secs_since(&second), -0.5);
        assert_eq!(first.secs_since(&first), 0.0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Timestamp::from(1500).to_string(), "1500ms");
    }
}
