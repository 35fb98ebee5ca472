//! Local applications
//!
//! An application is referenced by its units and its relations. Destroying it
//! destroys its relations in the same transaction; it is removed immediately
//! only when that leaves it with no references at all. Otherwise it stays
//! Dying until the removal of its last unit or relation removes it.

use std::fmt;

use fleetstate_concurrency::{Build, Refresh, TxnOutcome};
use fleetstate_core::{
    fields, Assert, Collection, Document, FleetError, FleetResult, Life, Mutation, Op, ResultExt,
};
use tracing::debug;

use crate::cleanup::{cleanup_op, CleanupKind};
use crate::lifecycle::{destroy_relations, DestroyPlan};
use crate::records::{ApplicationDoc, UnitDoc};
use crate::relation::Relation;
use crate::state::State;
use crate::unit::Unit;

/// Local id of an application's settings document
pub fn application_settings_key(name: &str) -> String {
    format!("{}config", application_settings_prefix(name))
}

/// Prefix of every settings document owned by an application
pub fn application_settings_prefix(name: &str) -> String {
    format!("a#{name}#")
}

/// Snapshot of a local application
#[derive(Debug, Clone)]
pub struct Application {
    st: State,
    doc: ApplicationDoc,
}

impl Application {
    pub(crate) fn new(st: State, doc: ApplicationDoc) -> Self {
        Application { st, doc }
    }

    /// Application name
    pub fn name(&self) -> &str {
        &self.doc.name
    }

    /// Life as of the last refresh
    pub fn life(&self) -> Life {
        self.doc.life
    }

    /// Units as of the last refresh
    pub fn unit_count(&self) -> i64 {
        self.doc.unit_count
    }

    /// Relations as of the last refresh
    pub fn relation_count(&self) -> i64 {
        self.doc.relation_count
    }

    fn doc_id(&self) -> String {
        self.st.doc_id(&self.doc.name)
    }

    fn entity(&self) -> String {
        format!("application {:?}", self.doc.name)
    }

    /// Relations this application takes part in
    pub fn relations(&self) -> FleetResult<Vec<Relation>> {
        self.st.relations_of(&self.doc.name)
    }

    /// Units of this application
    pub fn units(&self) -> FleetResult<Vec<Unit>> {
        let units: Vec<UnitDoc> = self.st.find_records(
            Collection::Units,
            Some(Assert::field_eq("application", self.doc.name.as_str())),
        )?;
        Ok(units
            .into_iter()
            .map(|doc| Unit::new(self.st.clone(), doc))
            .collect())
    }

    /// Ensure the application will be removed at some point
    ///
    /// Its relations are destroyed in the same transaction. If it has no units
    /// and every relation is removed, the application is removed too; otherwise
    /// it is marked Dying and its Alive units are queued for destruction.
    pub fn destroy(&mut self) -> FleetResult<()> {
        let context = format!("cannot destroy application {:?}", self.doc.name);
        let mut app = self.clone();
        let outcome = self
            .st
            .runner()
            .run_for(&mut app, |app, _| Ok(app.destroy_ops()?.into_build()))
            .annotate(|| context)?;
        debug!(target: "fleet::lifecycle", application = %self.doc.name, ?outcome, "application destroyed");

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
            // Early bail-out only: the assertions below catch changes made
            // after this read.
            return Err(FleetError::Conflict {
                collection: Collection::Applications.to_string(),
                id: self.doc_id(),
                reason: format!(
                    "found {} relations, expected {}",
                    relations.len(),
                    self.doc.relation_count
                ),
            });
        }

        let (mut ops, removed) = destroy_relations(&relations, &self.doc.name)?;

        if self.doc.unit_count == 0 && self.doc.relation_count == removed {
            let last_refs = Assert::is_alive()
                .and(Assert::field_eq(fields::UNIT_COUNT, 0))
                .and(Assert::field_eq(fields::RELATION_COUNT, removed));
            ops.extend(self.remove_ops(last_refs));
            return Ok(DestroyPlan::Remove(ops));
        }

        // Relation additions and removals both show up as a changed count.
        // Unit count only matters as far as zero versus non-zero.
        let mut not_last_refs =
            Assert::is_alive().and(Assert::field_eq(fields::RELATION_COUNT, self.doc.relation_count));
        if self.doc.unit_count > 0 {
            ops.push(cleanup_op(
                &self.st,
                CleanupKind::DyingApplicationUnits,
                &self.doc.name,
            ));
            not_last_refs = not_last_refs.and(Assert::gt(fields::UNIT_COUNT, 0));
        } else {
            not_last_refs = not_last_refs.and(Assert::field_eq(fields::UNIT_COUNT, 0));
        }
        let mut update = vec![Mutation::set(fields::LIFE, Life::Dying)];
        if removed != 0 {
            update.push(Mutation::inc(fields::RELATION_COUNT, -removed));
        }
        ops.push(Op::update(Collection::Applications, self.doc_id(), update).with_assert(not_last_refs));
        Ok(DestroyPlan::MarkDying(ops))
    }

    /// Operations removing the application, guarded by `assert`
    pub(crate) fn remove_ops(&self, assert: Assert) -> Vec<Op> {
        vec![
            Op::remove(Collection::Applications, self.doc_id()).with_assert(assert),
            cleanup_op(
                &self.st,
                CleanupKind::ApplicationSettings,
                &application_settings_prefix(&self.doc.name),
            ),
        ]
    }

    /// Add a principal unit
    pub fn add_unit(&self) -> FleetResult<Unit> {
        self.add_unit_with_principal(None)
    }

    /// Add a subordinate unit deployed alongside `principal`
    pub fn add_subordinate_unit(&self, principal: &Unit) -> FleetResult<Unit> {
        self.add_unit_with_principal(Some(principal.name()))
    }

    fn add_unit_with_principal(&self, principal: Option<&str>) -> FleetResult<Unit> {
        let context = format!("cannot add unit to application {:?}", self.doc.name);
        let number = self
            .st
            .sequence(&format!("application-{}", self.doc.name))
            .annotate(|| context.clone())?;
        let unit = UnitDoc {
            name: format!("{}/{}", self.doc.name, number),
            application: self.doc.name.clone(),
            model_uuid: self.st.model_uuid().to_string(),
            life: Life::Alive,
            principal: principal.map(str::to_string),
        };
        let doc = Document::from_record(&unit)?;
        let unit_id = self.st.doc_id(&unit.name);

        let mut app = self.clone();
        let outcome = self
            .st
            .runner()
            .run_for(&mut app, |app, _| {
                if app.doc.life != Life::Alive {
                    return Err(FleetError::invariant(app.entity(), "is not alive"));
                }
                Ok(Build::ops(vec![
                    Op::update(
                        Collection::Applications,
                        app.doc_id(),
                        vec![Mutation::inc(fields::UNIT_COUNT, 1)],
                    )
                    .with_assert(Assert::is_alive()),
                    Op::insert(Collection::Units, &unit_id, doc.clone()),
                ]))
            })
            .annotate(|| context.clone())?;
        if let TxnOutcome::NoOpNeeded { .. } = outcome {
            return Err(FleetError::not_found(self.entity()).annotate(context));
        }
        debug!(target: "fleet::lifecycle", unit = %unit.name, "unit added");
        Ok(Unit::new(self.st.clone(), unit))
    }
}

impl Refresh for Application {
    fn refresh(&mut self) -> FleetResult<()> {
        let doc: Option<ApplicationDoc> = self
            .st
            .read(Collection::Applications, &self.doc_id())
            .annotate(|| format!("cannot refresh application {:?}", self.doc.name))?;
        match doc {
            Some(doc) => {
                self.doc = doc;
                Ok(())
            }
            None => Err(FleetError::not_found(self.entity())),
        }
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.doc.name)
    }
}
