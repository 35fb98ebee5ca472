//! Testing utilities for exercising optimistic transactions
//!
//! This module provides tools for making concurrency deterministic in tests:
//!
//! - **Before-commit hooks**: closures run immediately before a submit is
//!   evaluated, simulating a concurrent writer that slips in between a
//!   builder's read and its commit
//! - **Fault injection**: see [`MemoryStore::inject_submit_faults`] for
//!   surfacing fatal store errors from `submit`
//!
//! # Example
//!
//! ```ignore
//! use fleetstate_storage::testing::before_hook;
//!
//! let racer = Arc::clone(&state);
//! store.set_before_hooks(vec![before_hook(move || {
//!     racer.application("mysql").unwrap().destroy().unwrap();
//! })]);
//! relation.destroy()?; // first attempt conflicts, second sees the new state
//! ```
//!
//! [`MemoryStore::inject_submit_faults`]: crate::MemoryStore::inject_submit_faults

mod hooks;

pub use hooks::{before_hook, noop_hook, BeforeHook};
