//! Cleanup Queue Tests
//!
//! Deferred cleanup requests are processed by explicit passes or by the
//! background worker. Passes may run concurrently; every request is carried
//! out and removed exactly once in effect.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use crate::common::*;
use fleetstate::{
    Build, CleanupChange, CleanupKind, CleanupReport, CleanupWorker, DyingUnitsCleanup,
};

fn config() -> EngineConfig {
    EngineConfig {
        max_txn_attempts: 20,
        ..EngineConfig::default()
    }
}

/// Add and remove `n` relations between fresh application pairs, leaving one
/// relation-settings request each
fn queue_relation_cleanups(model: &TestModel, n: usize) {
    for i in 0..n {
        let client = format!("client-{i}");
        let server = format!("server-{i}");
        model.apps(&[&client, &server]);
        let rel = model.st.add_relation(&db_endpoints(&client, &server)).unwrap();
        let unit = model.st.application(&client).unwrap().add_unit().unwrap();
        let ru = rel.unit(&unit).unwrap();
        ru.enter_scope(settings(&[("n", "1")])).unwrap();
        ru.leave_scope().unwrap();
        model.st.relation(rel.key()).unwrap().destroy().unwrap();
    }
}

fn relation_settings(model: &TestModel) -> usize {
    model
        .settings_ids()
        .iter()
        .filter(|id| id.starts_with("r#"))
        .count()
}

#[test]
fn pass_drains_queue_and_second_pass_finds_nothing() {
    let model = TestModel::with_config(config());
    queue_relation_cleanups(&model, 3);
    assert_eq!(relation_settings(&model), 3);

    let report = model.st.cleanup().unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(report.documents, 3);
    assert_eq!(relation_settings(&model), 0);
    assert!(!model.st.needs_cleanup().unwrap());
    assert_eq!(model.st.cleanup().unwrap(), CleanupReport::default());
}

#[test]
fn concurrent_passes_converge() {
    let model = TestModel::with_config(config());
    queue_relation_cleanups(&model, 8);

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let st = model.st.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                st.cleanup().unwrap()
            })
        })
        .collect();
    let reports: Vec<CleanupReport> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(reports.iter().all(|r| r.failed == 0), "{reports:?}");
    assert_eq!(reports.iter().map(|r| r.documents).sum::<usize>(), 8);
    assert!(!model.st.needs_cleanup().unwrap());
    assert_eq!(relation_settings(&model), 0);
}

#[test]
fn worker_drains_queue_in_background() {
    let model = TestModel::with_config(EngineConfig {
        cleanup_interval_ms: 10,
        ..config()
    });
    queue_relation_cleanups(&model, 2);

    let workers: Vec<CleanupWorker> = (0..2)
        .map(|_| CleanupWorker::from_config(model.st.clone()))
        .collect();
    let handles: Vec<_> = workers.iter().map(CleanupWorker::start).collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while model.st.needs_cleanup().unwrap() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    for worker in &workers {
        worker.shutdown();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!model.st.needs_cleanup().unwrap());
    assert_eq!(relation_settings(&model), 0);
}

/// Fails until told otherwise
struct Flaky(Arc<std::sync::atomic::AtomicBool>);

impl CleanupChange for Flaky {
    fn prepare(&self, _: &State, prefix: &str) -> FleetResult<Build> {
        if self.0.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FleetError::store(format!("settings for {prefix} unavailable")));
        }
        Ok(Build::NoOpNeeded)
    }
}

#[test]
fn failed_request_survives_for_next_pass() {
    let model = TestModel::with_config(config());
    queue_relation_cleanups(&model, 1);
    model.apps(&["wordpress"]);
    model.st.application("wordpress").unwrap().destroy().unwrap();

    let failing = Arc::new(std::sync::atomic::AtomicBool::new(true));
    model
        .st
        .register_cleanup(CleanupKind::RelationSettings, Arc::new(Flaky(Arc::clone(&failing))));

    let report = model.st.cleanup().unwrap();
    assert_eq!(report.records, 1, "application settings still cleaned");
    assert_eq!(report.failed, 1);
    assert!(model.st.needs_cleanup().unwrap());

    failing.store(false, std::sync::atomic::Ordering::SeqCst);
    let report = model.st.cleanup().unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(report.documents, 0);
    assert!(!model.st.needs_cleanup().unwrap());
}

#[test]
fn application_name_reusable_once_settings_cleaned() {
    let model = TestModel::new();
    model.apps(&["wordpress"]);
    model.st.application("wordpress").unwrap().destroy().unwrap();

    let err = model.st.add_application("wordpress", Map::new()).unwrap_err();
    assert!(err.is_invariant_violation(), "{err}");

    model.st.cleanup().unwrap();
    model
        .st
        .add_application("wordpress", settings(&[("blog-title", "again")]))
        .unwrap();
    let docs = model.docs(Collection::Settings);
    assert_eq!(docs["a#wordpress#config"]["settings"]["blog-title"], "again");
}

#[test]
fn stale_unit_cleanup_never_touches_a_new_application() {
    let model = TestModel::with_config(config());
    model.apps(&["wordpress"]);
    let mut app = model.st.application("wordpress").unwrap();
    let mut unit = app.add_unit().unwrap();
    app.destroy().unwrap();
    unit.ensure_dead().unwrap();
    unit.remove().unwrap();
    assert!(model.st.application("wordpress").unwrap_err().is_not_found());

    // The settings request goes through; the unit request is held back.
    let failing = Arc::new(std::sync::atomic::AtomicBool::new(true));
    model.st.register_cleanup(
        CleanupKind::DyingApplicationUnits,
        Arc::new(Flaky(Arc::clone(&failing))),
    );
    let report = model.st.cleanup().unwrap();
    assert_eq!(
        report,
        CleanupReport {
            records: 1,
            documents: 1,
            failed: 1
        }
    );

    let err = model.st.add_application("wordpress", Map::new()).unwrap_err();
    assert!(err.is_invariant_violation(), "{err}");

    model
        .st
        .register_cleanup(CleanupKind::DyingApplicationUnits, Arc::new(DyingUnitsCleanup));
    let report = model.st.cleanup().unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(report.documents, 0);
    assert!(!model.st.needs_cleanup().unwrap());

    let app = model.st.add_application("wordpress", Map::new()).unwrap();
    let unit = app.add_unit().unwrap();
    assert_eq!(unit.life(), Life::Alive);
    // A leftover request for the old application is ignored by the new one.
    assert_eq!(
        DyingUnitsCleanup.prepare(&model.st, "wordpress").unwrap(),
        Build::NoOpNeeded
    );
    assert_eq!(model.st.unit(unit.name()).unwrap().life(), Life::Alive);
}
