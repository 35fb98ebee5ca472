//! Units of local applications
//!
//! A unit holds one reference on its application. The unit lifecycle is only
//! modelled as far as relations and application removal need it: destroy
//! marks the unit Dying, `ensure_dead` makes it Dead, and `remove` deletes it
//! and releases the application's reference.

use std::fmt;

use fleetstate_concurrency::{Build, Refresh};
use fleetstate_core::{
    fields, Assert, Collection, FleetError, FleetResult, Life, Mutation, Op, ResultExt,
};
use tracing::debug;

use crate::application::Application;
use crate::records::{ApplicationDoc, UnitDoc};
use crate::state::State;

/// Snapshot of a unit
#[derive(Debug, Clone)]
pub struct Unit {
    st: State,
    doc: UnitDoc,
}

impl Unit {
    pub(crate) fn new(st: State, doc: UnitDoc) -> Self {
        Unit { st, doc }
    }

    /// Unit name, `<application>/<n>`
    pub fn name(&self) -> &str {
        &self.doc.name
    }

    /// Application name
    pub fn application_name(&self) -> &str {
        &self.doc.application
    }

    /// Life as of the last refresh
    pub fn life(&self) -> Life {
        self.doc.life
    }

    /// Principal unit name, for subordinates
    pub fn principal(&self) -> Option<&str> {
        self.doc.principal.as_deref()
    }

    /// Whether this is a principal unit
    pub fn is_principal(&self) -> bool {
        self.doc.principal.is_none()
    }

    fn doc_id(&self) -> String {
        self.st.doc_id(&self.doc.name)
    }

    fn entity(&self) -> String {
        format!("unit {:?}", self.doc.name)
    }

    /// Mark the unit Dying
    pub fn destroy(&mut self) -> FleetResult<()> {
        let context = format!("cannot destroy unit {:?}", self.doc.name);
        let mut unit = self.clone();
        self.st
            .runner()
            .run_for(&mut unit, |unit, _| {
                if unit.doc.life != Life::Alive {
                    return Ok(Build::NoOpNeeded);
                }
                Ok(Build::ops(vec![Op::update(
                    Collection::Units,
                    unit.doc_id(),
                    vec![Mutation::set(fields::LIFE, Life::Dying)],
                )
                .with_assert(Assert::is_alive())]))
            })
            .annotate(|| context)?;
        if self.doc.life == Life::Alive {
            self.doc.life = Life::Dying;
        }
        Ok(())
    }

    /// Mark the unit Dead
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the unit has been removed.
    pub fn ensure_dead(&mut self) -> FleetResult<()> {
        let context = format!("cannot mark unit {:?} dead", self.doc.name);
        let mut unit = self.clone();
        let outcome = self
            .st
            .runner()
            .run_for(&mut unit, |unit, _| {
                if unit.doc.life == Life::Dead {
                    return Ok(Build::NoOpNeeded);
                }
                Ok(Build::ops(vec![Op::update(
                    Collection::Units,
                    unit.doc_id(),
                    vec![Mutation::set(fields::LIFE, Life::Dead)],
                )
                .with_assert(Assert::not_dead())]))
            })
            .annotate(|| context.clone())?;
        if unit.doc.life != Life::Dead && !outcome.is_committed() {
            return Err(FleetError::not_found(self.entity()).annotate(context));
        }
        self.doc.life = Life::Dead;
        Ok(())
    }

    /// Remove a Dead unit, releasing its reference on the application
    ///
    /// A Dying application whose last reference this was is removed in the
    /// same transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the unit is not Dead or is still in a
    /// relation scope.
    pub fn remove(&self) -> FleetResult<()> {
        let context = format!("cannot remove unit {:?}", self.doc.name);
        let mut unit = self.clone();
        let outcome = self
            .st
            .runner()
            .run_for(&mut unit, |unit, _| unit.remove_ops())
            .annotate(|| context)?;
        debug!(target: "fleet::lifecycle", unit = %self.doc.name, ?outcome, "unit removed");
        Ok(())
    }

    fn remove_ops(&self) -> FleetResult<Build> {
        if self.doc.life != Life::Dead {
            return Err(FleetError::invariant(self.entity(), "is not dead"));
        }
        let suffix = format!("#{}", self.doc.name);
        if units_in_scope(&self.st)?.iter().any(|id| id.ends_with(&suffix)) {
            return Err(FleetError::invariant(self.entity(), "is still in a relation scope"));
        }

        let mut ops = vec![
            Op::remove(Collection::Units, self.doc_id()).with_assert(Assert::life(Life::Dead))
        ];
        let app_id = self.st.doc_id(&self.doc.application);
        let app: ApplicationDoc = match self.st.read(Collection::Applications, &app_id)? {
            Some(app) => app,
            // Refcounts would have kept the application around; nothing to release.
            None => return Ok(Build::ops(ops)),
        };
        match app.life {
            Life::Alive => ops.push(Op::decrement(
                Collection::Applications,
                app_id,
                fields::UNIT_COUNT,
                Some(Assert::is_alive()),
            )),
            _ if app.unit_count == 1 && app.relation_count == 0 => {
                let last_ref = Assert::life(Life::Dying)
                    .and(Assert::field_eq(fields::UNIT_COUNT, 1))
                    .and(Assert::field_eq(fields::RELATION_COUNT, 0));
                let application = Application::new(self.st.clone(), app);
                ops.extend(application.remove_ops(last_ref));
            }
            _ => ops.push(Op::decrement(
                Collection::Applications,
                app_id,
                fields::UNIT_COUNT,
                Some(Assert::life(Life::Dying).and(Assert::Or(vec![
                    Assert::gt(fields::UNIT_COUNT, 1),
                    Assert::gt(fields::RELATION_COUNT, 0),
                ]))),
            )),
        }
        Ok(Build::ops(ops))
    }
}

impl Refresh for Unit {
    fn refresh(&mut self) -> FleetResult<()> {
        let doc: Option<UnitDoc> = self
            .st
            .read(Collection::Units, &self.doc_id())
            .annotate(|| format!("cannot refresh unit {:?}", self.doc.name))?;
        match doc {
            Some(doc) => {
                self.doc = doc;
                Ok(())
            }
            None => Err(FleetError::not_found(self.entity())),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.doc.name)
    }
}

/// Scope document ids of every unit in scope of a relation in this model
fn units_in_scope(st: &State) -> FleetResult<Vec<String>> {
    Ok(st
        .store()
        .find(Collection::RelationScopes, &st.model_query())?
        .into_iter()
        .map(|(id, _)| id)
        .collect())
}
