//! Deferred cleanup
//!
//! Work too large or too open-ended to fit in the transaction that made it
//! necessary is recorded as a cleanup document in that same transaction and
//! carried out later, possibly by several workers at once. Each kind of
//! cleanup has a registered [`CleanupChange`] that turns a prefix into the
//! operations to run; handlers must tolerate the work already being done.
//!
//! | Kind | Recorded by | Prefix | Work |
//! |------|-------------|--------|------|
//! | `relation-settings` | relation removal | `r#<id>#` | remove the relation's unit settings |
//! | `application-settings` | application removal | `a#<name>#` | remove the application's settings |
//! | `dying-application-units` | application destroy | application name | mark Alive units Dying |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use fleetstate_concurrency::{Build, TxnOutcome};
use fleetstate_core::{
    fields, Assert, Collection, Document, FleetResult, Life, Mutation, Op, OpAction, Query,
    ResultExt,
};

use crate::records::{ApplicationDoc, UnitDoc};
use crate::state::State;

/// Kind of deferred cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupKind {
    /// Settings documents of a removed relation
    RelationSettings,
    /// Settings documents of a removed application
    ApplicationSettings,
    /// Alive units of a Dying application
    DyingApplicationUnits,
}

impl CleanupKind {
    /// Name stored in cleanup documents
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupKind::RelationSettings => "relation-settings",
            CleanupKind::ApplicationSettings => "application-settings",
            CleanupKind::DyingApplicationUnits => "dying-application-units",
        }
    }
}

impl std::fmt::Display for CleanupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted cleanup request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupDoc {
    /// What to clean up
    pub kind: CleanupKind,
    /// Which documents, interpreted per kind
    pub prefix: String,
    /// Owning model
    pub model_uuid: String,
}

/// Operation recording a cleanup request
///
/// Every request gets a fresh id, so the same prefix may be queued more than
/// once; handlers treat repeats as no-ops.
pub(crate) fn cleanup_op(st: &State, kind: CleanupKind, prefix: &str) -> Op {
    let doc = Document::new()
        .with("kind", kind.as_str())
        .with("prefix", prefix)
        .with("model_uuid", st.model_uuid());
    Op::insert(
        Collection::Cleanups,
        st.doc_id(&Uuid::new_v4().to_string()),
        doc,
    )
}

/// Builds the operations carrying out one cleanup request
pub trait CleanupChange: Send + Sync {
    /// Operations for the request with `prefix`, or `NoOpNeeded` if nothing is
    /// left to do
    fn prepare(&self, st: &State, prefix: &str) -> FleetResult<Build>;
}

/// Removes every settings document whose local id starts with the prefix
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsCleanup;

impl CleanupChange for SettingsCleanup {
    fn prepare(&self, st: &State, prefix: &str) -> FleetResult<Build> {
        let docs = st
            .store()
            .find(Collection::Settings, &Query::id_prefix(st.doc_id(prefix)))?;
        Ok(Build::ops(
            docs.into_iter()
                .map(|(id, _)| Op::remove(Collection::Settings, id))
                .collect(),
        ))
    }
}

/// Marks the Alive units of a Dying application Dying
///
/// Nothing is done once the application is gone; its units are then handled
/// one by one as they are removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DyingUnitsCleanup;

impl CleanupChange for DyingUnitsCleanup {
    fn prepare(&self, st: &State, application: &str) -> FleetResult<Build> {
        let app_id = st.doc_id(application);
        match st.read::<ApplicationDoc>(Collection::Applications, &app_id)? {
            Some(app) if app.life == Life::Dying => {}
            _ => return Ok(Build::NoOpNeeded),
        }

        let filter = Assert::field_eq("application", application).and(Assert::is_alive());
        let units: Vec<UnitDoc> = st.find_records(Collection::Units, Some(filter))?;
        if units.is_empty() {
            return Ok(Build::NoOpNeeded);
        }
        let mut ops = vec![Op::assert(
            Collection::Applications,
            app_id,
            Assert::life(Life::Dying),
        )];
        ops.extend(units.into_iter().map(|unit| {
            Op::update(
                Collection::Units,
                st.doc_id(&unit.name),
                vec![Mutation::set(fields::LIFE, Life::Dying)],
            )
            .with_assert(Assert::is_alive())
        }));
        Ok(Build::Ops(ops))
    }
}

/// Handlers every state starts with
pub(crate) fn default_handlers() -> Vec<(CleanupKind, Arc<dyn CleanupChange>)> {
    vec![
        (CleanupKind::RelationSettings, Arc::new(SettingsCleanup)),
        (CleanupKind::ApplicationSettings, Arc::new(SettingsCleanup)),
        (CleanupKind::DyingApplicationUnits, Arc::new(DyingUnitsCleanup)),
    ]
}

/// What one cleanup pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Cleanup requests completed and removed
    pub records: usize,
    /// Documents the completed requests changed or removed
    pub documents: usize,
    /// Requests that failed and were left for the next pass
    pub failed: usize,
}

impl State {
    /// Whether any cleanup requests are pending
    pub fn needs_cleanup(&self) -> FleetResult<bool> {
        Ok(!self
            .store()
            .find(Collection::Cleanups, &self.model_query())?
            .is_empty())
    }

    /// Carry out every pending cleanup request
    ///
    /// A request that fails is logged and kept for the next pass; the others
    /// still run. Concurrent passes may work the same requests; each request
    /// is removed once, by whichever pass gets there first.
    pub fn cleanup(&self) -> FleetResult<CleanupReport> {
        let mut report = CleanupReport::default();
        let pending = self
            .store()
            .find(Collection::Cleanups, &self.model_query())?;
        for (id, doc) in pending {
            let record: CleanupDoc = match doc.to_record() {
                Ok(record) => record,
                Err(e) => {
                    error!(target: "fleet::cleanup", id = %id, error = %e, "unreadable cleanup document");
                    report.failed += 1;
                    continue;
                }
            };
            match self.run_cleanup(&id, &record) {
                Ok(documents) => {
                    report.records += 1;
                    report.documents += documents;
                }
                Err(e) => {
                    error!(target: "fleet::cleanup", kind = %record.kind, prefix = %record.prefix, error = %e, "cleanup failed");
                    report.failed += 1;
                }
            }
        }
        if report.records > 0 || report.failed > 0 {
            info!(
                target: "fleet::cleanup",
                records = report.records,
                documents = report.documents,
                failed = report.failed,
                "cleanup pass finished"
            );
        }
        Ok(report)
    }

    fn run_cleanup(&self, id: &str, record: &CleanupDoc) -> FleetResult<usize> {
        let context = || format!("cannot run {} cleanup for {:?}", record.kind, record.prefix);
        let handler = self.cleanup_handler(record.kind).ok_or_else(|| {
            fleetstate_core::FleetError::store(format!("no handler for {} cleanup", record.kind))
        })?;

        let mut applied = 0;
        self.runner()
            .run(|_| {
                let build = handler.prepare(self, &record.prefix)?;
                applied = match &build {
                    Build::Ops(ops) => ops
                        .iter()
                        .filter(|op| !matches!(op.action, OpAction::AssertOnly))
                        .count(),
                    Build::NoOpNeeded => 0,
                };
                Ok(build)
            })
            .annotate(context)?;

        let outcome = self
            .runner()
            .run(|_| {
                if self.store().get(Collection::Cleanups, id)?.is_none() {
                    return Ok(Build::NoOpNeeded);
                }
                Ok(Build::ops(vec![Op::remove(Collection::Cleanups, id)]))
            })
            .annotate(context)?;
        if let TxnOutcome::NoOpNeeded { .. } = outcome {
            debug!(target: "fleet::cleanup", id = %id, "cleanup record already removed");
        }
        Ok(applied)
    }
}
