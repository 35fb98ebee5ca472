//! Machines
//!
//! Machines only carry enough lifecycle to guard their upgrade-series lock:
//! a lock can only be taken on an Alive machine, and removing the machine
//! removes the lock with it.

use std::fmt;

use fleetstate_concurrency::{Build, Refresh};
use fleetstate_core::{
    fields, Assert, Collection, FleetError, FleetResult, Life, Mutation, Op, ResultExt,
};
use tracing::debug;

use crate::records::MachineDoc;
use crate::state::State;
use crate::upgrade_series::remove_upgrade_series_lock_ops;

/// Snapshot of a machine
#[derive(Debug, Clone)]
pub struct Machine {
    st: State,
    doc: MachineDoc,
}

impl Machine {
    pub(crate) fn new(st: State, doc: MachineDoc) -> Self {
        Machine { st, doc }
    }

    /// Machine id
    pub fn id(&self) -> &str {
        &self.doc.machine_id
    }

    /// Operating system series
    pub fn series(&self) -> &str {
        &self.doc.series
    }

    /// Life as of the last refresh
    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub(crate) fn state(&self) -> &State {
        &self.st
    }

    pub(crate) fn doc_id(&self) -> String {
        self.st.doc_id(&self.doc.machine_id)
    }

    pub(crate) fn entity(&self) -> String {
        format!("machine {:?}", self.doc.machine_id)
    }

    /// Mark the machine Dying
    pub fn destroy(&mut self) -> FleetResult<()> {
        self.advance(Life::Dying)
            .annotate(|| format!("cannot destroy machine {:?}", self.doc.machine_id))
    }

    /// Mark the machine Dead
    pub fn ensure_dead(&mut self) -> FleetResult<()> {
        self.advance(Life::Dead)
            .annotate(|| format!("cannot mark machine {:?} dead", self.doc.machine_id))
    }

    fn advance(&mut self, to: Life) -> FleetResult<()> {
        let mut machine = self.clone();
        self.st.runner().run_for(&mut machine, |machine, _| {
            if machine.doc.life >= to {
                return Ok(Build::NoOpNeeded);
            }
            Ok(Build::ops(vec![Op::update(
                Collection::Machines,
                machine.doc_id(),
                vec![Mutation::set(fields::LIFE, to)],
            )
            .with_assert(Assert::life(machine.doc.life))]))
        })?;
        if self.doc.life < to {
            self.doc.life = to;
        }
        Ok(())
    }

    /// Remove the machine together with its upgrade-series lock, if any
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the machine is still Alive.
    pub fn remove(&self) -> FleetResult<()> {
        let context = format!("cannot remove machine {:?}", self.doc.machine_id);
        let mut machine = self.clone();
        let outcome = self
            .st
            .runner()
            .run_for(&mut machine, |machine, _| {
                if machine.doc.life == Life::Alive {
                    return Err(FleetError::invariant(machine.entity(), "is still alive"));
                }
                let mut ops = vec![Op::remove(Collection::Machines, machine.doc_id())
                    .with_assert(Assert::field_ne(fields::LIFE, Life::Alive))];
                let lock_id = machine.doc_id();
                if machine
                    .st
                    .store()
                    .get(Collection::UpgradeSeriesLocks, &lock_id)?
                    .is_some()
                {
                    ops.extend(remove_upgrade_series_lock_ops(&lock_id));
                }
                Ok(Build::ops(ops))
            })
            .annotate(|| context)?;
        debug!(target: "fleet::lifecycle", machine = %self.doc.machine_id, ?outcome, "machine removed");
        Ok(())
    }
}

impl Refresh for Machine {
    fn refresh(&mut self) -> FleetResult<()> {
        let doc: Option<MachineDoc> = self
            .st
            .read(Collection::Machines, &self.doc_id())
            .annotate(|| format!("cannot refresh machine {:?}", self.doc.machine_id))?;
        match doc {
            Some(doc) => {
                self.doc = doc;
                Ok(())
            }
            None => Err(FleetError::not_found(self.entity())),
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "machine-{}", self.doc.machine_id)
    }
}
