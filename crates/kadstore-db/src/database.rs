//! The value database.
//!
//! Owns the key to bag mapping and the per-source record counters, and runs
//! every write through the host filter and the admission policy. All state
//! sits behind one mutex so admission checks and the writes they guard are
//! atomic.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use kadstore_core::{NodeId, Timestamp};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::bag::ValueBag;
use crate::config::DatabaseConfig;
use crate::filter::{AllowAll, HostFilter};
use crate::policy::{AdmissionContext, AdmissionPolicy, FloodGuard, PrecedencePolicy, Verdict, Violation};
use crate::record::{StoreRequest, ValueRecord};
use crate::DbError;

/// Wire status for a store refused because the source is banned.
pub const STATUS_BANNED: u16 = 0x0001;

/// Wire status for a store refused by the admission policy.
pub const STATUS_POLICY_VIOLATION: u16 = 0x0002;

/// Why a store was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// The host filter rejected the source address
    Banned,
    /// The admission policy rejected the record
    PolicyViolation(Violation),
}

impl DenyReason {
    /// Returns the status code the RPC layer reports to the remote peer.
    ///
    /// A banned peer should try another node; a policy violation means the
    /// key itself is not accepting the record.
    pub fn status_code(&self) -> u16 {
        match self {
            DenyReason::Banned => STATUS_BANNED,
            DenyReason::PolicyViolation(_) => STATUS_POLICY_VIOLATION,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Banned => f.write_str("source banned"),
            DenyReason::PolicyViolation(violation) => write!(f, "policy violation: {violation}"),
        }
    }
}

/// Result of a store or remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The write was applied
    Admitted,
    /// The write was refused and nothing changed
    Denied(DenyReason),
}

impl StoreOutcome {
    /// Returns true if the write was applied.
    pub fn is_admitted(&self) -> bool {
        matches!(self, StoreOutcome::Admitted)
    }

    /// Returns the denial reason, if any.
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            StoreOutcome::Admitted => None,
            StoreOutcome::Denied(reason) => Some(*reason),
        }
    }

    fn violation(violation: Violation) -> Self {
        StoreOutcome::Denied(DenyReason::PolicyViolation(violation))
    }
}

/// State guarded by the database lock.
#[derive(Default)]
struct State {
    bags: HashMap<NodeId, ValueBag>,
    /// Live non-local records per source host
    sources: HashMap<IpAddr, usize>,
    /// Stores refused by the per-address limit, per source host
    rejected: HashMap<IpAddr, usize>,
}

impl State {
    fn source_count(&self, ip: &IpAddr) -> usize {
        self.sources.get(ip).copied().unwrap_or(0)
    }

    /// Live records plus refused over-limit stores; compared against the
    /// ban threshold.
    fn flood_pressure(&self, ip: &IpAddr) -> usize {
        self.source_count(ip) + self.rejected.get(ip).copied().unwrap_or(0)
    }

    fn reject(&mut self, ip: IpAddr) {
        *self.rejected.entry(ip).or_insert(0) += 1;
    }

    /// Counts a newly stored record against its source host.
    ///
    /// Local records and records without a source are not counted.
    fn attribute(&mut self, record: &ValueRecord) {
        if record.is_local_value() {
            return;
        }
        if let Some(addr) = record.source() {
            *self.sources.entry(addr.ip()).or_insert(0) += 1;
        }
    }

    /// Releases a record that left the store from its source host's count.
    fn release(&mut self, record: &ValueRecord) {
        if record.is_local_value() {
            return;
        }
        let Some(ip) = record.source().map(|addr| addr.ip()) else {
            return;
        };
        if let Some(count) = self.sources.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.sources.remove(&ip);
                self.rejected.remove(&ip);
            }
        }
    }
}

/// Admission-controlled store of DHT value records.
pub struct Database {
    config: DatabaseConfig,
    policy: Box<dyn AdmissionPolicy>,
    filter: Arc<dyn HostFilter>,
    state: Mutex<State>,
}

impl Database {
    /// Creates a database with the default policy and a permissive host
    /// filter.
    pub fn new(config: DatabaseConfig) -> Result<Self, DbError> {
        Self::with_host_filter(config, Arc::new(AllowAll))
    }

    /// Creates a database with the default policy and the given host filter.
    pub fn with_host_filter(
        config: DatabaseConfig,
        filter: Arc<dyn HostFilter>,
    ) -> Result<Self, DbError> {
        let policy = FloodGuard::new(
            PrecedencePolicy::new(config.max_keys, config.max_records_per_key),
            config.per_address_limit,
        );
        Self::with_policy(config, policy, filter)
    }

    /// Creates a database with a custom admission policy.
    ///
    /// The capacity and per-address limits in `config` are only enforced if
    /// `policy` enforces them; the ban threshold is always applied.
    pub fn with_policy(
        config: DatabaseConfig,
        policy: impl AdmissionPolicy + 'static,
        filter: Arc<dyn HostFilter>,
    ) -> Result<Self, DbError> {
        config.validate()?;
        Ok(Self {
            config,
            policy: Box::new(policy),
            filter,
            state: Mutex::new(State::default()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Stores a record received from `source`, or removes the creator's
    /// record if the payload is empty.
    pub fn store(&self, record: ValueRecord, source: SocketAddr) -> StoreOutcome {
        if !self.filter.allow(&source) {
            debug!(key = %record.key(), %source, "Store from banned host");
            return StoreOutcome::Denied(DenyReason::Banned);
        }

        let (outcome, pressure, escalate) = {
            let mut state = self.state.lock();
            let before = state.flood_pressure(&source.ip());
            let outcome = self.admit(&mut state, record.with_source(source), source);
            let after = state.flood_pressure(&source.ip());
            (outcome, after, self.crosses_ban_threshold(before, after))
        };

        // Called unlocked so the filter may block or query the database
        if escalate {
            warn!(%source, pressure, "Source exceeded ban threshold");
            self.filter.ban(&source);
        }

        outcome
    }

    fn crosses_ban_threshold(&self, before: usize, after: usize) -> bool {
        self.config
            .ban_threshold
            .is_some_and(|threshold| before <= threshold && after > threshold)
    }

    fn admit(&self, state: &mut State, record: ValueRecord, source: SocketAddr) -> StoreOutcome {
        let verdict = {
            let ctx = AdmissionContext {
                key_count: state.bags.len(),
                bag: state.bags.get(record.key()),
                source,
                source_records: state.source_count(&source.ip()),
            };
            self.policy.evaluate(&ctx, &record)
        };

        if let Verdict::Deny(violation) = verdict {
            debug!(
                key = %record.key(),
                creator = %record.creator(),
                %source,
                %violation,
                "Store denied"
            );
            if violation == Violation::AddressLimit {
                state.reject(source.ip());
            }
            return StoreOutcome::violation(violation);
        }

        if record.is_empty() {
            self.apply_removal(state, &record)
        } else {
            self.apply_insert(state, record, source)
        }
    }

    /// Stores a request decoded by the RPC layer.
    pub fn handle_request(&self, request: StoreRequest) -> StoreOutcome {
        let source = request.source;
        self.store(request.into_record(), source)
    }

    fn apply_removal(&self, state: &mut State, record: &ValueRecord) -> StoreOutcome {
        let key = *record.key();
        let Some(bag) = state.bags.get_mut(&key) else {
            return StoreOutcome::violation(Violation::NothingToRemove);
        };

        let removed = match bag.remove(record, !record.is_local_value()) {
            Ok(Some(removed)) => removed,
            Ok(None) => return StoreOutcome::violation(Violation::NothingToRemove),
            Err(err) => {
                error!(%key, %err, "Bag rejected removal for its own key");
                debug_assert!(false, "bag rejected removal: {err}");
                return StoreOutcome::violation(Violation::NothingToRemove);
            }
        };

        if bag.is_empty() {
            state.bags.remove(&key);
        }
        state.release(&removed);

        debug!(%key, creator = %record.creator(), "Record removed");
        StoreOutcome::Admitted
    }

    fn apply_insert(&self, state: &mut State, record: ValueRecord, source: SocketAddr) -> StoreOutcome {
        let key = *record.key();
        let record = Arc::new(record);

        let (added, previous) = {
            let bag = state.bags.entry(key).or_insert_with(|| ValueBag::new(key));
            let previous = bag.get(record.creator()).cloned();
            let added = bag.add(Arc::clone(&record));
            if bag.is_empty() {
                state.bags.remove(&key);
            }
            (added, previous)
        };

        match added {
            Ok(true) => {}
            Ok(false) => {
                // The policy already checked precedence under this lock
                error!(%key, creator = %record.creator(), "Bag refused a record the policy admitted");
                debug_assert!(false, "bag refused admitted record");
                return StoreOutcome::violation(Violation::Precedence);
            }
            Err(err) => {
                error!(%key, %err, "Bag rejected record for its own key");
                debug_assert!(false, "bag rejected record: {err}");
                return StoreOutcome::violation(Violation::Precedence);
            }
        }

        // Attribute before releasing so a refresh never drops the host to zero
        state.attribute(&record);
        if let Some(previous) = previous {
            state.release(&previous);
        }

        debug!(
            %key,
            creator = %record.creator(),
            provenance = ?record.provenance(),
            %source,
            "Record stored"
        );
        StoreOutcome::Admitted
    }

    /// Removes the creator's record unconditionally.
    ///
    /// Used by the owning node; remote removals go through [`Database::store`].
    pub fn remove(&self, key: &NodeId, creator: &NodeId) -> Option<Arc<ValueRecord>> {
        let mut state = self.state.lock();
        let bag = state.bags.get_mut(key)?;
        let removed = bag.remove_creator(creator)?;
        if bag.is_empty() {
            state.bags.remove(key);
        }
        state.release(&removed);
        Some(removed)
    }

    /// Returns a snapshot of the bag stored under `key`.
    pub fn get(&self, key: &NodeId) -> Option<ValueBag> {
        self.state.lock().bags.get(key).cloned()
    }

    /// Returns the record stored by `creator` under `key`.
    pub fn get_record(&self, key: &NodeId, creator: &NodeId) -> Option<Arc<ValueRecord>> {
        self.state.lock().bags.get(key)?.get(creator).cloned()
    }

    /// Returns true if `creator` has a record under `key`.
    pub fn contains(&self, key: &NodeId, creator: &NodeId) -> bool {
        self.state
            .lock()
            .bags
            .get(key)
            .is_some_and(|bag| bag.contains(creator))
    }

    /// Returns the stored keys.
    pub fn keys(&self) -> Vec<NodeId> {
        self.state.lock().bags.keys().copied().collect()
    }

    /// Returns the number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.state.lock().bags.len()
    }

    /// Returns the total number of records.
    pub fn record_count(&self) -> usize {
        self.state.lock().bags.values().map(ValueBag::len).sum()
    }

    /// Returns a snapshot of every stored record.
    ///
    /// The returned handles share publish state with the stored records.
    pub fn values(&self) -> Vec<Arc<ValueRecord>> {
        self.state
            .lock()
            .bags
            .values()
            .flat_map(|bag| bag.records().cloned())
            .collect()
    }

    /// Returns the local records due for republishing at `now`.
    pub fn republish_due(&self, now: Timestamp) -> Vec<Arc<ValueRecord>> {
        let republish = &self.config.republish;
        self.values()
            .into_iter()
            .filter(|record| record.requires_republish(now, republish))
            .collect()
    }

    /// Registers a lookup of `key` and returns the smoothed request rate.
    ///
    /// Returns `None` if nothing is stored under `key`.
    pub fn increment_request_load(&self, key: &NodeId, now: Timestamp) -> Option<f32> {
        let mut state = self.state.lock();
        let bag = state.bags.get_mut(key)?;
        Some(bag.increment_request_load(now, &self.config.request_load))
    }

    /// Returns the smoothed request rate for `key`.
    pub fn request_load(&self, key: &NodeId) -> Option<f32> {
        self.state.lock().bags.get(key).map(ValueBag::request_load)
    }

    /// Returns the number of live records attributed to the host of `addr`.
    pub fn records_from(&self, addr: &SocketAddr) -> usize {
        self.state.lock().source_count(&addr.ip())
    }

    /// Drops non-local records older than the configured expiration.
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        let expiration = self.config.value_expiration();
        let mut state = self.state.lock();

        let mut expired = Vec::new();
        state.bags.retain(|_, bag| {
            expired.extend(bag.drain_where(|record| record.is_expired(now, expiration)));
            !bag.is_empty()
        });

        for record in &expired {
            state.release(record);
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Purged expired records");
        }
        expired.len()
    }

    /// Removes every record and resets the per-source counters.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.bags.clear();
        state.sources.clear();
        state.rejected.clear();
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Database")
            .field("keys", &state.bags.len())
            .field("sources", &state.sources.len())
            .field("config", &self.config)
            .finish()
    }
}
