//! Per-key record bags.
//!
//! A bag holds every record stored under one key, at most one per creator,
//! and tracks how often the key is requested.

use std::collections::HashMap;
use std::sync::Arc;

use kadstore_core::{NodeId, Timestamp};
use tracing::trace;

use crate::config::RequestLoadConfig;
use crate::record::ValueRecord;
use crate::DbError;

/// Records sharing one key, indexed by creator.
#[derive(Debug, Clone)]
pub struct ValueBag {
    key: NodeId,
    records: HashMap<NodeId, Arc<ValueRecord>>,
    request_load: f32,
    last_request: Option<Timestamp>,
}

impl ValueBag {
    /// Creates an empty bag for `key`.
    pub fn new(key: NodeId) -> Self {
        Self {
            key,
            records: HashMap::new(),
            request_load: 0.0,
            last_request: None,
        }
    }

    /// Returns the key shared by all records in the bag.
    pub fn key(&self) -> &NodeId {
        &self.key
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the bag holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the record stored by `creator`.
    pub fn get(&self, creator: &NodeId) -> Option<&Arc<ValueRecord>> {
        self.records.get(creator)
    }

    /// Returns true if `creator` has a record in the bag.
    pub fn contains(&self, creator: &NodeId) -> bool {
        self.records.contains_key(creator)
    }

    /// Iterates over the records.
    pub fn records(&self) -> impl Iterator<Item = &Arc<ValueRecord>> {
        self.records.values()
    }

    /// Iterates over the creators with a record in the bag.
    pub fn creators(&self) -> impl Iterator<Item = &NodeId> {
        self.records.keys()
    }

    /// Adds or replaces the creator's record.
    ///
    /// Returns `Ok(false)` without modifying the bag if an existing record of
    /// higher provenance occupies the slot.
    pub fn add(&mut self, record: Arc<ValueRecord>) -> Result<bool, DbError> {
        self.check_key(&record)?;
        if record.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "cannot add removal record for {}",
                record.creator()
            )));
        }

        if let Some(current) = self.records.get(record.creator()) {
            if record.provenance() < current.provenance() {
                return Ok(false);
            }
        }

        self.records.insert(*record.creator(), record);
        Ok(true)
    }

    /// Removes the creator's record in response to a removal record.
    ///
    /// Remote removals are only honored when the removal record is direct
    /// (or local), and a local record can only be removed by a local removal.
    /// Non-remote removals always succeed.
    pub fn remove(
        &mut self,
        record: &ValueRecord,
        remote: bool,
    ) -> Result<Option<Arc<ValueRecord>>, DbError> {
        self.check_key(record)?;

        if remote {
            if !record.is_direct() {
                return Ok(None);
            }
            match self.records.get(record.creator()) {
                Some(current) if current.is_local_value() && !record.is_local_value() => {
                    return Ok(None);
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        Ok(self.records.remove(record.creator()))
    }

    /// Removes the creator's record unconditionally.
    pub fn remove_creator(&mut self, creator: &NodeId) -> Option<Arc<ValueRecord>> {
        self.records.remove(creator)
    }

    /// Removes every record for which `remove` returns true and returns them.
    pub fn drain_where(
        &mut self,
        mut remove: impl FnMut(&ValueRecord) -> bool,
    ) -> Vec<Arc<ValueRecord>> {
        let doomed: Vec<NodeId> = self
            .records
            .iter()
            .filter(|(_, record)| remove(record.as_ref()))
            .map(|(creator, _)| *creator)
            .collect();

        doomed
            .iter()
            .filter_map(|creator| self.records.remove(creator))
            .collect()
    }

    /// Registers a request for this key and returns the smoothed
    /// requests-per-second estimate.
    ///
    /// The first request only starts the clock. A non-positive interval
    /// (clock skew or a same-instant burst) or an idle period longer than the
    /// nulling delay resets the estimate to zero.
    pub fn increment_request_load(&mut self, now: Timestamp, config: &RequestLoadConfig) -> f32 {
        let Some(last) = self.last_request.replace(now) else {
            return self.request_load;
        };

        let delta = now.secs_since(&last);
        if delta <= 0.0 || delta > config.nulling_delay_secs as f32 {
            self.request_load = 0.0;
        } else {
            let alpha = config.smoothing_factor;
            self.request_load += alpha * (1.0 / delta - self.request_load);
        }

        trace!(key = %self.key, load = self.request_load, "Request load updated");
        self.request_load
    }

    /// Returns the current smoothed request rate.
    pub fn request_load(&self) -> f32 {
        self.request_load
    }

    fn check_key(&self, record: &ValueRecord) -> Result<(), DbError> {
        if record.key() != &self.key {
            return Err(DbError::InvalidArgument(format!(
                "record key {} does not match bag key {}",
                record.key(),
                self.key
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ValueType;
    use bytes::Bytes;

    fn direct(key: NodeId, creator: NodeId, payload: &'static str) -> Arc<ValueRecord> {
        Arc::new(ValueRecord::remote(key, creator, creator, ValueType::TEST, 0, payload))
    }

    fn indirect(key: NodeId, creator: NodeId, payload: &'static str) -> Arc<ValueRecord> {
        Arc::new(ValueRecord::remote(key, creator, NodeId::random(), ValueType::TEST, 0, payload))
    }

    fn local(key: NodeId, creator: NodeId, payload: &'static str) -> Arc<ValueRecord> {
        Arc::new(ValueRecord::local(key, creator, ValueType::TEST, 0, payload))
    }

    fn removal(key: NodeId, creator: NodeId, sender: NodeId, local: bool) -> ValueRecord {
        ValueRecord::new(key, creator, sender, ValueType::TEST, 0, Bytes::new(), local)
    }

    fn load_config(alpha: f32) -> RequestLoadConfig {
        RequestLoadConfig {
            smoothing_factor: alpha,
            nulling_delay_secs: 30,
        }
    }

    #[test]
    fn test_one_record_per_creator() {
        let key = NodeId::random();
        let creator = NodeId::random();
        let mut bag = ValueBag::new(key);

        assert!(bag.add(direct(key, creator, "one")).unwrap());
        assert!(bag.add(direct(key, creator, "two")).unwrap());
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get(&creator).unwrap().payload().as_ref(), b"two");

        assert!(bag.add(direct(key, NodeId::random(), "three")).unwrap());
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn test_key_mismatch_is_invalid_argument() {
        let mut bag = ValueBag::new(NodeId::random());
        let other = NodeId::random();

        let result = bag.add(direct(other, other, "x"));
        assert!(matches!(result, Err(DbError::InvalidArgument(_))));

        let result = bag.remove(&removal(other, other, other, false), true);
        assert!(matches!(result, Err(DbError::InvalidArgument(_))));
    }

    #[test]
    fn test_add_removal_record_is_invalid_argument() {
        let key = NodeId::random();
        let mut bag = ValueBag::new(key);
        let result = bag.add(Arc::new(removal(key, key, key, false)));
        assert!(matches!(result, Err(DbError::InvalidArgument(_))));
    }

    #[test]
    fn test_local_not_replaced_by_remote() {
        let key = NodeId::random();
        let creator = NodeId::random();
        let mut bag = ValueBag::new(key);

        assert!(bag.add(local(key, creator, "Tonic")).unwrap());
        assert!(!bag.add(direct(key, creator, "Lime")).unwrap());
        assert!(!bag.add(indirect(key, creator, "Lime")).unwrap());
        assert_eq!(bag.get(&creator).unwrap().payload().as_ref(), b"Tonic");

        assert!(bag.add(local(key, creator, "Gin")).unwrap());
        assert_eq!(bag.get(&creator).unwrap().payload().as_ref(), b"Gin");
    }

    #[test]
    fn test_direct_not_replaced_by_indirect() {
        let key = NodeId::random();
        let creator = NodeId::random();
        let mut bag = ValueBag::new(key);

        assert!(bag.add(direct(key, creator, "Hello World")).unwrap());
        assert!(!bag.add(indirect(key, creator, "Mary")).unwrap());
        assert_eq!(bag.get(&creator).unwrap().payload().as_ref(), b"Hello World");
    }

    #[test]
    fn test_indirect_replaced_by_anything() {
        let key = NodeId::random();
        let creator = NodeId::random();
        let mut bag = ValueBag::new(key);

        assert!(bag.add(indirect(key, creator, "a")).unwrap());
        assert!(bag.add(indirect(key, creator, "b")).unwrap());
        assert!(bag.add(direct(key, creator, "c")).unwrap());
        assert_eq!(bag.get(&creator).unwrap().payload().as_ref(), b"c");
    }

    #[test]
    fn test_remote_remove_rules() {
        let key = NodeId::random();
        let creator = NodeId::random();
        let mut bag = ValueBag::new(key);
        bag.add(direct(key, creator, "x")).unwrap();

        // Indirect removal is ignored
        let forwarded = removal(key, creator, NodeId::random(), false);
        assert!(bag.remove(&forwarded, true).unwrap().is_none());
        assert_eq!(bag.len(), 1);

        // Direct removal succeeds
        let removed = bag.remove(&removal(key, creator, creator, false), true).unwrap();
        assert_eq!(removed.unwrap().payload().as_ref(), b"x");
        assert!(bag.is_empty());

        // Nothing left to remove
        assert!(bag.remove(&removal(key, creator, creator, false), true).unwrap().is_none());
    }

    #[test]
    fn test_local_record_only_removed_by_local() {
        let key = NodeId::random();
        let creator = NodeId::random();
        let mut bag = ValueBag::new(key);
        bag.add(local(key, creator, "mine")).unwrap();

        assert!(bag.remove(&removal(key, creator, creator, false), true).unwrap().is_none());
        assert_eq!(bag.len(), 1);

        assert!(bag.remove(&removal(key, creator, creator, true), true).unwrap().is_some());
        assert!(bag.is_empty());
    }

    #[test]
    fn test_non_remote_remove_is_unconditional() {
        let key = NodeId::random();
        let creator = NodeId::random();
        let mut bag = ValueBag::new(key);
        bag.add(local(key, creator, "mine")).unwrap();

        let forwarded = removal(key, creator, NodeId::random(), false);
        assert!(bag.remove(&forwarded, false).unwrap().is_some());
        assert!(bag.is_empty());
    }

    #[test]
    fn test_drain_where() {
        let key = NodeId::random();
        let mut bag = ValueBag::new(key);
        let keep = NodeId::random();
        bag.add(local(key, keep, "stay")).unwrap();
        bag.add(direct(key, NodeId::random(), "go")).unwrap();
        bag.add(direct(key, NodeId::random(), "go")).unwrap();

        let removed = bag.drain_where(|record| !record.is_local_value());
        assert_eq!(removed.len(), 2);
        assert_eq!(bag.len(), 1);
        assert!(bag.contains(&keep));
    }

    #[test]
    fn test_request_load_first_call_starts_clock() {
        let mut bag = ValueBag::new(NodeId::random());
        let config = load_config(0.25);

        assert_eq!(bag.increment_request_load(Timestamp::new(10_000), &config), 0.0);

        // Half a second later: 0 + 0.25 * (2 - 0)
        let load = bag.increment_request_load(Timestamp::new(10_500), &config);
        assert!((load - 0.5).abs() < 1e-6);
        assert!(load > config.smoothing_factor);

        // Slower request lowers the estimate: 0.5 + 0.25 * (1 - 0.5)
        let slower = bag.increment_request_load(Timestamp::new(11_500), &config);
        assert!((slower - 0.625).abs() < 1e-6);
    }

    #[test]
    fn test_request_load_zero_smoothing() {
        let mut bag = ValueBag::new(NodeId::random());
        let config = load_config(0.0);

        bag.increment_request_load(Timestamp::new(0), &config);
        assert_eq!(bag.increment_request_load(Timestamp::new(500), &config), 0.0);
    }

    #[test]
    fn test_request_load_non_positive_delta_resets() {
        let mut bag = ValueBag::new(NodeId::random());
        let config = load_config(0.5);

        bag.increment_request_load(Timestamp::new(1_000), &config);
        assert!(bag.increment_request_load(Timestamp::new(1_100), &config) > 0.0);

        // Same instant
        assert_eq!(bag.increment_request_load(Timestamp::new(1_100), &config), 0.0);

        bag.increment_request_load(Timestamp::new(1_200), &config);
        // Clock went backwards
        assert_eq!(bag.increment_request_load(Timestamp::new(900), &config), 0.0);
    }

    #[test]
    fn test_request_load_nulling_delay() {
        let mut bag = ValueBag::new(NodeId::random());
        let config = load_config(0.5);

        bag.increment_request_load(Timestamp::new(0), &config);
        bag.increment_request_load(Timestamp::new(100), &config);
        assert!(bag.request_load() > 0.0);

        let idle = Timestamp::new(100 + 31_000);
        assert_eq!(bag.increment_request_load(idle, &config), 0.0);
    }

    #[test]
    fn test_request_load_bounded_by_rate() {
        let mut bag = ValueBag::new(NodeId::random());
        let config = load_config(0.25);

        let mut now = Timestamp::new(0);
        let mut load = bag.increment_request_load(now, &config);
        for _ in 0..10 {
            now = Timestamp::new(now.0 + 10);
            load = bag.increment_request_load(now, &config);
        }

        // Converges towards 100 req/s from below
        assert!(load > 1.0);
        assert!(load < 1.0 / 0.01);
    }
}
