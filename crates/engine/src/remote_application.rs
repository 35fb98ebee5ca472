//! Applications offered from other models
//!
//! A remote application has no units here; relations are its only
//! references. Otherwise it follows the same destroy rules as a local
//! application.

use std::fmt;

use fleetstate_concurrency::Refresh;
use fleetstate_core::{
    fields, Assert, Collection, FleetError, FleetResult, Life, Mutation, Op, ResultExt,
};
use tracing::debug;

use crate::lifecycle::{destroy_relations, DestroyPlan};
use crate::records::RemoteApplicationDoc;
use crate::relation::Relation;
use crate::state::State;

/// Snapshot of a remote application
#[derive(Debug, Clone)]
pub struct RemoteApplication {
    st: State,
    doc: RemoteApplicationDoc,
}

impl RemoteApplication {
    pub(crate) fn new(st: State, doc: RemoteApplicationDoc) -> Self {
        RemoteApplication { st, doc }
    }

    /// Application name
    pub fn name(&self) -> &str {
        &self.doc.name
    }

    /// Model the application is offered from
    pub fn source_model(&self) -> &str {
        &self.doc.source_model
    }

    /// Life as of the last refresh
    pub fn life(&self) -> Life {
        self.doc.life
    }

    /// Relations as of the last refresh
    pub fn relation_count(&self) -> i64 {
        self.doc.relation_count
    }

    fn doc_id(&self) -> String {
        self.st.doc_id(&self.doc.name)
    }

    /// Relations this application takes part in
    pub fn relations(&self) -> FleetResult<Vec<Relation>> {
        self.st.relations_of(&self.doc.name)
    }

    /// Ensure the remote application will be removed at some point
    pub fn destroy(&mut self) -> FleetResult<()> {
        let context = format!("cannot destroy remote application {:?}", self.doc.name);
        let mut app = self.clone();
        let outcome = self
            .st
            .runner()
            .run_for(&mut app, |app, _| Ok(app.destroy_ops()?.into_build()))
            .annotate(|| context)?;
        debug!(target: "fleet::lifecycle", application = %self.doc.name, ?outcome, "remote application destroyed");

        if self.doc.life == Life::Alive {
            self.doc.life = Life::Dying;
        }
        Ok(())
    }

    pub(crate) fn destroy_ops(&self) -> FleetResult<DestroyPlan> {
        if self.doc.life != Life::Alive {
            return Ok(DestroyPlan::AlreadyDying);
        }
        let relations = self.relations()?;
        if relations.len() as i64 != self.doc.relation_count {
            return Err(FleetError::Conflict {
                collection: Collection::RemoteApplications.to_string(),
                id: self.doc_id(),
                reason: format!(
                    "found {} relations, expected {}",
                    relations.len(),
                    self.doc.relation_count
                ),
            });
        }

        let (mut ops, removed) = destroy_relations(&relations, &self.doc.name)?;
        if self.doc.relation_count == removed {
            let last_refs =
                Assert::is_alive().and(Assert::field_eq(fields::RELATION_COUNT, removed));
            ops.extend(self.remove_ops(last_refs));
            return Ok(DestroyPlan::Remove(ops));
        }

        let mut update = vec![Mutation::set(fields::LIFE, Life::Dying)];
        if removed != 0 {
            update.push(Mutation::inc(fields::RELATION_COUNT, -removed));
        }
        ops.push(
            Op::update(Collection::RemoteApplications, self.doc_id(), update).with_assert(
                Assert::is_alive()
                    .and(Assert::field_eq(fields::RELATION_COUNT, self.doc.relation_count)),
            ),
        );
        Ok(DestroyPlan::MarkDying(ops))
    }

    /// Operations removing the remote application, guarded by `assert`
    pub(crate) fn remove_ops(&self, assert: Assert) -> Vec<Op> {
        vec![Op::remove(Collection::RemoteApplications, self.doc_id()).with_assert(assert)]
    }
}

impl Refresh for RemoteApplication {
    fn refresh(&mut self) -> FleetResult<()> {
        let doc: Option<RemoteApplicationDoc> = self
            .st
            .read(Collection::RemoteApplications, &self.doc_id())
            .annotate(|| format!("cannot refresh remote application {:?}", self.doc.name))?;
        match doc {
            Some(doc) => {
                self.doc = doc;
                Ok(())
            }
            None => Err(FleetError::not_found(format!(
                "remote application {:?}",
                self.doc.name
            ))),
        }
    }
}

impl fmt::Display for RemoteApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.doc.name)
    }
}
