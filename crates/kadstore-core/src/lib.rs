//! kadstore Core - primitives shared by the kadstore crates.
//!
//! This crate provides:
//! - The 160-bit Kademlia identifier (`NodeId`)
//! - Millisecond timestamps

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod identifiers;
pub mod time;

pub use identifiers::*;
pub use time::*;
