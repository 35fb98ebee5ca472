//! Lifecycle engine for fleetstate
//!
//! This crate holds everything that knows about entity kinds:
//! - State: the handle every snapshot reads and writes through
//! - Entity snapshots: Relation, RelationUnit, Application, RemoteApplication,
//!   Unit, Machine
//! - Destroy and remove logic, including the one-hop cascade between
//!   relations and their applications
//! - Endpoint refcount collaborators (local and remote applications)
//! - Deferred cleanup queue and its background worker
//! - Machine upgrade-series locks
//! - EngineConfig
//!
//! Every transition is built as a conditional operation set and committed
//! through the transaction runner, so concurrent callers never need a lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod application;
pub mod cleanup;
pub mod config;
pub mod lifecycle;
pub mod machine;
pub mod records;
pub mod refcount;
pub mod relation;
pub mod relation_unit;
pub mod remote_application;
pub mod state;
pub mod topology;
pub mod unit;
pub mod upgrade_series;
pub mod worker;

pub use application::Application;
pub use cleanup::{
    CleanupChange, CleanupDoc, CleanupKind, CleanupReport, DyingUnitsCleanup, SettingsCleanup,
};
pub use config::EngineConfig;
pub use lifecycle::DestroyPlan;
pub use machine::Machine;
pub use records::{
    ApplicationSource, Endpoint, RelationScope, Role, UnitUpgradeStatus, UpgradeSeriesLock,
    UpgradeSeriesStatus,
};
pub use refcount::{Departure, EndpointRefcount, LocalApplications, RemoteApplications};
pub use relation::{relation_key, Relation};
pub use relation_unit::RelationUnit;
pub use remote_application::RemoteApplication;
pub use state::State;
pub use unit::Unit;
pub use worker::CleanupWorker;
