//! Integration tests and fixtures for kadstore.
//!
//! This crate provides:
//! - Record and address builders shared by the integration tests
//! - A host filter that records every ban request

pub mod filter;
pub mod fixtures;

pub use filter::RecordingFilter;
pub use fixtures::{direct, indirect, local, removal, source};
