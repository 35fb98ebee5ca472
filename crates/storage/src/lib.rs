//! Storage layer for fleetstate
//!
//! This crate implements the in-process document store with:
//! - MemoryStore: BTreeMap-based storage with RwLock
//! - Atomic conditional commits (all assertions checked, then all effects applied)
//! - Revision management with AtomicU64
//! - Before-commit hooks and fault injection for deterministic tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod testing;

pub use memory::{MemoryStore, StoreStats};
