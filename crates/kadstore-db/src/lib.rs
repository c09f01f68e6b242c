//! kadstore DB - local value storage for a Kademlia DHT node.
//!
//! Holds small opaque records keyed by a 160-bit identifier and decides
//! which store attempts are admitted:
//! - One record per (key, creator) slot, arbitrated by provenance rank
//! - Capacity limits on keys and on creators per key
//! - Per-source flood limits and host banning
//! - Republish bookkeeping for locally originated records

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod bag;
pub mod config;
pub mod database;
pub mod filter;
pub mod policy;
pub mod record;

pub use bag::ValueBag;
pub use config::{DatabaseConfig, RepublishConfig, RequestLoadConfig};
pub use database::{Database, DenyReason, StoreOutcome, STATUS_BANNED, STATUS_POLICY_VIOLATION};
pub use filter::{AllowAll, BanList, HostFilter};
pub use policy::{AdmissionContext, AdmissionPolicy, FloodGuard, PrecedencePolicy, Verdict, Violation};
pub use record::{Provenance, StoreRequest, ValueRecord, ValueType};

use thiserror::Error;

/// Default maximum number of distinct keys.
pub const DEFAULT_MAX_KEYS: usize = 16_384;

/// Default maximum number of creators stored under one key.
pub const DEFAULT_MAX_RECORDS_PER_KEY: usize = 5;

/// Default number of live records a single source address may hold.
pub const DEFAULT_PER_ADDRESS_LIMIT: usize = 5;

/// Default record count at which a source address gets banned.
pub const DEFAULT_BAN_THRESHOLD: usize = 20;

/// Default replication factor (k).
pub const DEFAULT_REPLICATION_FACTOR: usize = 20;

/// Default republish interval for a fully replicated record (1 hour).
pub const DEFAULT_REPUBLISH_INTERVAL_SECS: u64 = 3600;

/// Default lower bound on the republish interval (2 minutes).
pub const DEFAULT_MIN_REPUBLISH_INTERVAL_SECS: u64 = 120;

/// Default lifetime of a non-local record (90 minutes).
/// A remote creator has to republish within this window.
pub const DEFAULT_VALUE_EXPIRATION_SECS: u64 = 5400;

/// Default smoothing factor for the request load moving average.
pub const DEFAULT_REQUEST_LOAD_SMOOTHING: f32 = 0.25;

/// Default idle time after which the request load resets to zero.
pub const DEFAULT_REQUEST_LOAD_NULLING_DELAY_SECS: u64 = 30;

/// Errors from database operations.
///
/// Admission denials are not errors; they are reported as
/// [`StoreOutcome::Denied`].
#[derive(Debug, Error)]
pub enum DbError {
    /// Caller contract violation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
