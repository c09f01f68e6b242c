//! Admission policy.
//!
//! Every write is evaluated against the current database state before it
//! touches a bag. The base [`PrecedencePolicy`] checks capacity limits and
//! provenance precedence; [`FloodGuard`] wraps any policy with a per-source
//! record limit so address-based abuse checks stay separate from the data
//! consistency rules.

use std::fmt;
use std::net::SocketAddr;

use crate::bag::ValueBag;
use crate::record::ValueRecord;

/// Database state visible to a policy.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionContext<'a> {
    /// Number of distinct keys currently stored
    pub key_count: usize,
    /// Bag stored under the candidate's key, if any
    pub bag: Option<&'a ValueBag>,
    /// Address the candidate arrived from
    pub source: SocketAddr,
    /// Live records currently attributed to the source host
    pub source_records: usize,
}

impl AdmissionContext<'_> {
    /// Returns the record currently occupying the candidate's slot.
    pub fn existing(&self, candidate: &ValueRecord) -> Option<&ValueRecord> {
        self.bag
            .and_then(|bag| bag.get(candidate.creator()))
            .map(|record| record.as_ref())
    }
}

/// Why a write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Violation {
    /// The key table is full
    KeyLimit,
    /// The key already holds the maximum number of creators
    RecordLimit,
    /// The slot is held by a record of higher provenance
    Precedence,
    /// Removals must come from the creator or this node
    IndirectRemoval,
    /// The source host already holds its share of records
    AddressLimit,
    /// A removal found no matching record
    NothingToRemove,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Violation::KeyLimit => "key limit reached",
            Violation::RecordLimit => "records per key limit reached",
            Violation::Precedence => "existing record has higher precedence",
            Violation::IndirectRemoval => "indirect removal",
            Violation::AddressLimit => "per-address limit reached",
            Violation::NothingToRemove => "nothing to remove",
        };
        f.write_str(reason)
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The write may proceed
    Allow,
    /// The write is refused
    Deny(Violation),
}

impl Verdict {
    /// Returns true if the write may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Decides whether a candidate record may be written.
pub trait AdmissionPolicy: Send + Sync {
    /// Evaluates `candidate` against the current state.
    fn evaluate(&self, ctx: &AdmissionContext<'_>, candidate: &ValueRecord) -> Verdict;
}

impl<P: AdmissionPolicy + ?Sized> AdmissionPolicy for Box<P> {
    fn evaluate(&self, ctx: &AdmissionContext<'_>, candidate: &ValueRecord) -> Verdict {
        (**self).evaluate(ctx, candidate)
    }
}

/// Capacity limits plus provenance precedence.
///
/// Local records are always admitted. Otherwise a new key needs room in the
/// key table, a new creator needs room in the bag, and a replacement needs
/// a provenance rank at least as high as the record it replaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecedencePolicy {
    max_keys: Option<usize>,
    max_records_per_key: Option<usize>,
}

impl PrecedencePolicy {
    /// Creates a policy; `None` leaves a limit unbounded.
    pub fn new(max_keys: Option<usize>, max_records_per_key: Option<usize>) -> Self {
        Self {
            max_keys,
            max_records_per_key,
        }
    }
}

impl AdmissionPolicy for PrecedencePolicy {
    fn evaluate(&self, ctx: &AdmissionContext<'_>, candidate: &ValueRecord) -> Verdict {
        if candidate.is_local_value() {
            return Verdict::Allow;
        }

        // Removals are never accepted second-hand, whatever the store holds
        if !candidate.is_direct() && candidate.is_empty() {
            return Verdict::Deny(Violation::IndirectRemoval);
        }

        let Some(bag) = ctx.bag else {
            return match self.max_keys {
                Some(max) if ctx.key_count >= max => Verdict::Deny(Violation::KeyLimit),
                _ => Verdict::Allow,
            };
        };

        match bag.get(candidate.creator()) {
            None => match self.max_records_per_key {
                Some(max) if bag.len() >= max => Verdict::Deny(Violation::RecordLimit),
                _ => Verdict::Allow,
            },
            Some(existing) if candidate.provenance() < existing.provenance() => {
                Verdict::Deny(Violation::Precedence)
            }
            Some(_) => Verdict::Allow,
        }
    }
}

/// Per-source record limit wrapped around another policy.
///
/// A remote store that would give its source host a new slot is refused once
/// the host holds `limit` live records. Removals, local records and
/// refreshes of a slot the host already holds pass through to the inner
/// policy.
#[derive(Debug, Clone, Copy)]
pub struct FloodGuard<P> {
    inner: P,
    limit: Option<usize>,
}

impl<P> FloodGuard<P> {
    /// Wraps `inner`; `None` disables the limit.
    pub fn new(inner: P, limit: Option<usize>) -> Self {
        Self { inner, limit }
    }

    /// Returns the wrapped policy.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: AdmissionPolicy> AdmissionPolicy for FloodGuard<P> {
    fn evaluate(&self, ctx: &AdmissionContext<'_>, candidate: &ValueRecord) -> Verdict {
        if let Some(limit) = self.limit {
            let exempt = candidate.is_local_value() || candidate.is_empty();
            let holds_slot = ctx
                .existing(candidate)
                .and_then(ValueRecord::source)
                .is_some_and(|held| held.ip() == ctx.source.ip());

            if !exempt && !holds_slot && ctx.source_records >= limit {
                return Verdict::Deny(Violation::AddressLimit);
            }
        }

        self.inner.evaluate(ctx, candidate)
    }
}
