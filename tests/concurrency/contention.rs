//! Contention Tests
//!
//! Real threads released together by a barrier. Whatever order the store
//! serializes them in, every transition succeeds and the model ends up
//! consistent.

use std::sync::{Arc, Barrier};
use std::thread;

use crate::common::*;

fn contended() -> TestModel {
    TestModel::with_config(EngineConfig {
        max_txn_attempts: 50,
        ..EngineConfig::default()
    })
}

type Job = Box<dyn FnOnce() -> FleetResult<()> + Send>;

fn job(f: impl FnOnce() -> FleetResult<()> + Send + 'static) -> Job {
    Box::new(f)
}

fn run_together(jobs: Vec<Job>) {
    let barrier = Arc::new(Barrier::new(jobs.len()));
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                job()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
}

#[test]
fn destroys_and_departures_converge() {
    for _ in 0..10 {
        let model = contended();
        let rel = model.wordpress_mysql();
        let wordpress = model.st.application("wordpress").unwrap().add_unit().unwrap();
        let mysql = model.st.application("mysql").unwrap().add_unit().unwrap();
        let wp_ru = rel.unit(&wordpress).unwrap();
        let my_ru = rel.unit(&mysql).unwrap();
        wp_ru.enter_scope(Map::new()).unwrap();
        my_ru.enter_scope(Map::new()).unwrap();

        let mut rel = model.st.relation(rel.key()).unwrap();
        let mut wp_app = model.st.application("wordpress").unwrap();
        let mut my_app = model.st.application("mysql").unwrap();
        run_together(vec![
            job(move || rel.destroy()),
            job(move || wp_app.destroy()),
            job(move || my_app.destroy()),
            job(move || wp_ru.leave_scope()),
            job(move || my_ru.leave_scope()),
        ]);

        assert!(model.st.relations().unwrap().is_empty());
        for name in ["wordpress", "mysql"] {
            let app = model.st.application(name).unwrap();
            assert_eq!(app.life(), Life::Dying);
            assert_eq!(app.relation_count(), 0);
        }
        let relation_cleanups = model
            .docs(Collection::Cleanups)
            .values()
            .filter(|doc| doc["kind"] == "relation-settings")
            .count();
        assert_eq!(relation_cleanups, 1);
        model.assert_refcounts_consistent();
    }
}

#[test]
fn concurrent_destroys_of_one_relation_remove_it_once() {
    for _ in 0..10 {
        let model = contended();
        let rel = model.wordpress_mysql();

        let jobs: Vec<Job> = (0..6)
            .map(|_| {
                let mut rel = rel.clone();
                job(move || rel.destroy())
            })
            .collect();
        run_together(jobs);

        assert!(model.st.relations().unwrap().is_empty());
        assert_eq!(model.docs(Collection::Cleanups).len(), 1);
        assert_eq!(model.st.application("wordpress").unwrap().relation_count(), 0);
        model.assert_refcounts_consistent();
    }
}

#[test]
fn concurrent_unit_additions_are_all_counted() {
    let model = contended();
    model.apps(&["wordpress"]);

    let jobs: Vec<Job> = (0..8)
        .map(|_| {
            let st = model.st.clone();
            job(move || st.application("wordpress")?.add_unit().map(|_| ()))
        })
        .collect();
    run_together(jobs);

    let app = model.st.application("wordpress").unwrap();
    assert_eq!(app.unit_count(), 8);
    let mut names: Vec<String> = app.units().unwrap().iter().map(|u| u.name().to_string()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 8);
    model.assert_refcounts_consistent();
}

#[test]
fn concurrent_entries_and_departures_keep_counts() {
    let model = contended();
    let rel = model.wordpress_mysql();
    let units: Vec<_> = (0..6)
        .map(|_| model.st.application("wordpress").unwrap().add_unit().unwrap())
        .collect();
    let members: Vec<_> = units.iter().map(|u| rel.unit(u).unwrap()).collect();
    for ru in members.iter().step_by(2) {
        ru.enter_scope(Map::new()).unwrap();
    }

    // Units already in scope leave while the others enter.
    let jobs: Vec<Job> = members
        .into_iter()
        .enumerate()
        .map(|(i, ru)| {
            job(move || {
                if i % 2 == 0 {
                    ru.leave_scope()
                } else {
                    ru.enter_scope(Map::new())
                }
            })
        })
        .collect();
    run_together(jobs);

    let rel = model.st.relation(rel.key()).unwrap();
    assert_eq!(rel.unit_count(), 3);
    model.assert_refcounts_consistent();
}
