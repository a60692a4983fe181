//! RocksDB-backed persistence (`heavy-state` feature).
//!
//! One database, two column families: conversation states and cost
//! records. Values are JSON so the free-form context map survives
//! storage unchanged.

pub mod rocks;
pub mod schema;

pub use rocks::{RocksStore, SharedRocksStore};
