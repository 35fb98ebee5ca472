//! fleetstate - transactional entity lifecycle for fleet topology
//!
//! fleetstate persists a deployed topology (applications, units, machines and
//! the relations between applications) as documents in a shared store, and
//! moves entities through a one-way lifecycle (Alive → Dying → Dead → removed)
//! with optimistic, retried, multi-document transactions.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use fleetstate::{Endpoint, MemoryStore, State};
//!
//! let st = State::new(Arc::new(MemoryStore::new()));
//! st.add_application("wordpress", Default::default())?;
//! st.add_application("mysql", Default::default())?;
//! let mut rel = st.add_relation(&[
//!     Endpoint::requirer("wordpress", "db", "mysql"),
//!     Endpoint::provider("mysql", "server", "mysql"),
//! ])?;
//!
//! // No units in scope: removed immediately, settings queued for cleanup
//! rel.destroy()?;
//! st.cleanup()?;
//! ```
//!
//! # Architecture
//!
//! - [`fleetstate_core`]: documents, assertions, operations, the store trait
//!   and the error taxonomy
//! - [`fleetstate_storage`]: the in-process [`MemoryStore`]
//! - [`fleetstate_concurrency`]: the [`TxnRunner`] retry loop
//! - [`fleetstate_engine`]: entity snapshots and lifecycle rules

pub use fleetstate_concurrency::{Build, Refresh, RetryConfig, TxnOutcome, TxnRunner};
pub use fleetstate_core::{
    fields, Assert, Collection, Document, DocumentStore, FleetError, FleetResult, Life, Mutation,
    Op, OpAction, Query, ResultExt, SubmitOutcome,
};
pub use fleetstate_engine::*;
pub use fleetstate_storage::{MemoryStore, StoreStats};

pub use fleetstate_concurrency;
pub use fleetstate_core;
pub use fleetstate_engine;
pub use fleetstate_storage;
