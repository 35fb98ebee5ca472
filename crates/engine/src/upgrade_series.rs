//! Machine upgrade-series locks
//!
//! While a machine's series is upgraded, a lock document keyed by the machine
//! tracks each of its units through preparation. The lock can only be created
//! on an Alive machine, and unit status changes re-assert that the machine is
//! still Alive.

use chrono::{DateTime, Utc};
use tracing::info;

use fleetstate_concurrency::Build;
use fleetstate_core::{
    Assert, Collection, Document, FleetError, FleetResult, Mutation, Op, ResultExt,
};

use crate::machine::Machine;
use crate::records::{UnitUpgradeStatus, UpgradeSeriesLock, UpgradeSeriesStatus};

const PREPARE_UNITS: &str = "prepare_units";

/// Operations creating a lock on an Alive machine that has none
pub fn create_upgrade_series_lock_ops(machine_doc_id: &str, lock: Document) -> Vec<Op> {
    vec![
        Op::assert(Collection::Machines, machine_doc_id, Assert::is_alive()),
        Op::insert(Collection::UpgradeSeriesLocks, machine_doc_id, lock),
    ]
}

/// Operations removing an existing lock
pub fn remove_upgrade_series_lock_ops(lock_id: &str) -> Vec<Op> {
    vec![Op::remove(Collection::UpgradeSeriesLocks, lock_id).with_assert(Assert::DocExists)]
}

/// Operations setting the status of the unit at `index` of `prepare_units`
///
/// The update asserts the unit is still at that index and does not already
/// have the status, so a concurrent reordering or identical change conflicts.
pub fn set_upgrade_series_unit_status_ops(
    machine_doc_id: &str,
    unit: &str,
    index: usize,
    status: UpgradeSeriesStatus,
    now: DateTime<Utc>,
) -> FleetResult<Vec<Op>> {
    let entry = format!("{PREPARE_UNITS}.{index}");
    let timestamp = serde_json::to_value(now)?;
    Ok(vec![
        Op::assert(Collection::Machines, machine_doc_id, Assert::is_alive()),
        Op::update(
            Collection::UpgradeSeriesLocks,
            machine_doc_id,
            vec![
                Mutation::set(&format!("{entry}.status"), status),
                Mutation::set(&format!("{entry}.timestamp"), timestamp),
            ],
        )
        .with_assert(Assert::And(vec![
            Assert::exists(PREPARE_UNITS),
            Assert::field_eq(&format!("{entry}.id"), unit),
            Assert::field_ne(&format!("{entry}.status"), status),
        ])),
    ])
}

impl Machine {
    fn lock_entity(&self) -> String {
        format!("upgrade series lock for {}", self.entity())
    }

    /// The machine's upgrade-series lock
    pub fn upgrade_series_lock(&self) -> FleetResult<UpgradeSeriesLock> {
        self.state()
            .read_existing(Collection::UpgradeSeriesLocks, &self.doc_id(), || {
                self.lock_entity()
            })
    }

    /// Lock the machine for an upgrade to `to_series`, tracking `units`
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if the machine is already locked
    /// - `InvariantViolation` if the machine is not Alive
    pub fn create_upgrade_series_lock(&self, units: &[&str], to_series: &str) -> FleetResult<()> {
        let context = || format!("cannot create upgrade series lock for {}", self.entity());
        let now = Utc::now();
        let lock = UpgradeSeriesLock {
            machine_id: self.id().to_string(),
            from_series: self.series().to_string(),
            to_series: to_series.to_string(),
            prepare_units: units
                .iter()
                .map(|unit| UnitUpgradeStatus {
                    id: unit.to_string(),
                    status: UpgradeSeriesStatus::NotStarted,
                    timestamp: now,
                })
                .collect(),
            complete_units: Vec::new(),
        };
        let doc = Document::from_record(&lock)?;
        let st = self.state();
        let id = self.doc_id();

        st.runner()
            .run(|_| {
                if st.store().get(Collection::UpgradeSeriesLocks, &id)?.is_some() {
                    return Err(FleetError::AlreadyExists {
                        entity: self.lock_entity(),
                    });
                }
                let machine = st
                    .store()
                    .get(Collection::Machines, &id)?
                    .ok_or_else(|| FleetError::not_found(self.entity()))?;
                if !Assert::is_alive().matches(Some(&machine)) {
                    return Err(FleetError::invariant(self.entity(), "is not alive"));
                }
                Ok(Build::ops(create_upgrade_series_lock_ops(&id, doc.clone())))
            })
            .annotate(context)?;
        info!(target: "fleet::lifecycle", machine = %self.id(), to_series = %to_series, "upgrade series lock created");
        Ok(())
    }

    /// Release the machine's upgrade-series lock
    pub fn remove_upgrade_series_lock(&self) -> FleetResult<()> {
        let context = || format!("cannot remove upgrade series lock for {}", self.entity());
        let st = self.state();
        let id = self.doc_id();
        st.runner()
            .run(|_| {
                if st.store().get(Collection::UpgradeSeriesLocks, &id)?.is_none() {
                    return Err(FleetError::not_found(self.lock_entity()));
                }
                Ok(Build::ops(remove_upgrade_series_lock_ops(&id)))
            })
            .annotate(context)?;
        Ok(())
    }

    /// Set the preparation status of one unit in the lock
    ///
    /// Setting the status the unit already has is a no-op.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the machine has no lock or the unit is not in it
    /// - `InvariantViolation` if the machine is not Alive
    pub fn set_upgrade_series_unit_status(
        &self,
        unit: &str,
        status: UpgradeSeriesStatus,
    ) -> FleetResult<()> {
        let context = || {
            format!(
                "cannot set upgrade series status of unit {unit:?} on {}",
                self.entity()
            )
        };
        let st = self.state();
        let id = self.doc_id();
        st.runner()
            .run(|_| {
                let alive = st
                    .store()
                    .get(Collection::Machines, &id)?
                    .map_or(false, |doc| Assert::is_alive().matches(Some(&doc)));
                if !alive {
                    return Err(FleetError::invariant(self.entity(), "is not alive"));
                }
                let lock = self.upgrade_series_lock()?;
                let index = lock
                    .prepare_units
                    .iter()
                    .position(|u| u.id == unit)
                    .ok_or_else(|| {
                        FleetError::not_found(format!("unit {unit:?} in {}", self.lock_entity()))
                    })?;
                if lock.prepare_units[index].status == status {
                    return Ok(Build::NoOpNeeded);
                }
                let ops = set_upgrade_series_unit_status_ops(&id, unit, index, status, Utc::now())?;
                Ok(Build::ops(ops))
            })
            .annotate(context)?;
        Ok(())
    }
}
