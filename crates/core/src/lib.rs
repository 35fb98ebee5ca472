//! Core types and traits for fleetstate
//!
//! This crate defines the foundational types shared by every layer:
//! - Life: monotonic entity lifecycle (Alive → Dying → Dead)
//! - Document: JSON document with dotted-path field access
//! - Assert / Mutation / Op: conditional operations committed as one atomic set
//! - Query: id / id-prefix / predicate lookups
//! - Collection: names of the persisted entity collections
//! - DocumentStore: the store client contract (get, find, submit)
//! - FleetError: the error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod life;
pub mod ops;
pub mod traits;
pub mod types;

pub use document::Document;
pub use error::{FleetError, FleetResult, ResultExt};
pub use life::Life;
pub use ops::{Assert, Mutation, Op, OpAction, Query};
pub use traits::{ConflictInfo, DocumentStore, SubmitOutcome};
pub use types::{fields, Collection, DocKey};
