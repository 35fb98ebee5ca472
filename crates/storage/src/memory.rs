//! MemoryStore: in-process document store with atomic conditional commits
//!
//! This module implements the `DocumentStore` trait using:
//! - `BTreeMap<DocKey, StoredDocument>` for ordered document storage
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` for the monotonically increasing store revision
//!
//! # Commit Protocol
//!
//! ```text
//! 1. Run the next before-commit hook, if one is queued (testing only)
//! 2. Take the write lock
//! 3. Evaluate every op's assertion against the pre-transaction state
//!    - any failure → Conflict, nothing applied
//! 4. Stage every action on copies of the affected documents
//!    - malformed action → Store error, nothing applied
//! 5. Allocate the commit revision and install the staged documents
//! ```
//!
//! Steps 2-5 happen under a single write lock, so readers observe either all
//! of a transaction's effects or none of them.

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use fleetstate_core::{
    Assert, Collection, ConflictInfo, DocKey, Document, DocumentStore, FleetError, FleetResult,
    Op, OpAction, Query, SubmitOutcome,
};

use crate::testing::BeforeHook;

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// A document plus the revision of the transaction that last wrote it
#[derive(Debug, Clone)]
struct StoredDocument {
    doc: Document,
    txn_revno: u64,
}

/// Counters describing store activity
///
/// Uses Relaxed ordering; these are observational only.
#[derive(Debug, Default)]
struct StoreCounters {
    committed: AtomicU64,
    conflicts: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the store counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Operation sets committed
    pub committed: u64,
    /// Operation sets rejected by an assertion
    pub conflicts: u64,
    /// Operation sets that failed fatally (malformed or injected faults)
    pub failed: u64,
}

/// In-memory document store
///
/// Implements `DocumentStore` for tests, tooling and single-process
/// deployments. Thread-safe through `parking_lot::RwLock` and `AtomicU64`.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<DocKey, StoredDocument>>,
    revision: AtomicU64,
    hooks: Mutex<VecDeque<BeforeHook>>,
    faults: Mutex<VecDeque<FleetError>>,
    counters: StoreCounters,
}

impl MemoryStore {
    /// Create a new empty store at revision 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: Collection) -> usize {
        self.data
            .read()
            .keys()
            .filter(|k| k.collection == collection)
            .count()
    }

    /// Ids of every document in a collection, sorted
    pub fn ids(&self, collection: Collection) -> Vec<String> {
        self.data
            .read()
            .keys()
            .filter(|k| k.collection == collection)
            .map(|k| k.id.clone())
            .collect()
    }

    /// Revision of the transaction that last wrote a document
    pub fn txn_revno(&self, collection: Collection, id: &str) -> Option<u64> {
        self.data
            .read()
            .get(&DocKey::new(collection, id))
            .map(|sd| sd.txn_revno)
    }

    /// Snapshot of the activity counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            committed: self.counters.committed.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Queue hooks to run before subsequent submits, one hook per submit
    ///
    /// A hook simulates a concurrent writer slipping in between a builder's
    /// read and its commit. Submits issued by a hook itself (on the same
    /// thread) do not consume further hooks.
    pub fn set_before_hooks(&self, hooks: Vec<BeforeHook>) {
        self.hooks.lock().extend(hooks);
    }

    /// Number of queued hooks not yet run
    pub fn pending_hooks(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Make the next `errors.len()` submits fail with the given errors
    pub fn inject_submit_faults(&self, errors: Vec<FleetError>) {
        self.faults.lock().extend(errors);
    }

    fn run_before_hook(&self) {
        if IN_HOOK.with(|flag| flag.get()) {
            return;
        }
        let hook = self.hooks.lock().pop_front();
        if let Some(hook) = hook {
            IN_HOOK.with(|flag| flag.set(true));
            hook();
            IN_HOOK.with(|flag| flag.set(false));
        }
    }

    fn conflict(&self, op_index: usize, op: &Op, failed: &Assert) -> SubmitOutcome {
        self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "fleet::store",
            collection = %op.collection,
            id = %op.id,
            assertion = %failed,
            "transaction aborted"
        );
        SubmitOutcome::Conflict(ConflictInfo {
            op_index,
            collection: op.collection,
            id: op.id.clone(),
            reason: failed.to_string(),
        })
    }

    fn fail(&self, err: FleetError) -> FleetResult<SubmitOutcome> {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        Err(err)
    }
}

fn implicit_assert(action: &OpAction) -> Option<Assert> {
    match action {
        OpAction::AssertOnly => None,
        OpAction::Insert(_) => Some(Assert::DocMissing),
        OpAction::Update(_) | OpAction::Remove => Some(Assert::DocExists),
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: Collection, id: &str) -> FleetResult<Option<Document>> {
        Ok(self
            .data
            .read()
            .get(&DocKey::new(collection, id))
            .map(|sd| sd.doc.clone()))
    }

    fn find(&self, collection: Collection, query: &Query) -> FleetResult<Vec<(String, Document)>> {
        let data = self.data.read();
        if let Some(id) = &query.id {
            return Ok(data
                .get(&DocKey::new(collection, id.clone()))
                .filter(|sd| query.matches(id, &sd.doc))
                .map(|sd| vec![(id.clone(), sd.doc.clone())])
                .unwrap_or_default());
        }
        Ok(data
            .iter()
            .filter(|(k, sd)| k.collection == collection && query.matches(&k.id, &sd.doc))
            .map(|(k, sd)| (k.id.clone(), sd.doc.clone()))
            .collect())
    }

    fn submit(&self, ops: &[Op]) -> FleetResult<SubmitOutcome> {
        self.run_before_hook();

        if let Some(err) = self.faults.lock().pop_front() {
            return self.fail(err);
        }

        let mut data = self.data.write();

        // Phase 1: every assertion against the pre-transaction state
        for (i, op) in ops.iter().enumerate() {
            let current = data
                .get(&DocKey::new(op.collection, op.id.clone()))
                .map(|sd| &sd.doc);
            let checks = implicit_assert(&op.action).into_iter().chain(op.assert.clone());
            for check in checks {
                if !check.matches(current) {
                    return Ok(self.conflict(i, op, &check));
                }
            }
        }

        // Phase 2: stage actions on copies
        let mut staged: BTreeMap<DocKey, Option<Document>> = BTreeMap::new();
        for op in ops {
            let key = DocKey::new(op.collection, op.id.clone());
            let current = match staged.get(&key) {
                Some(doc) => doc.clone(),
                None => data.get(&key).map(|sd| sd.doc.clone()),
            };
            let next = match &op.action {
                OpAction::AssertOnly => continue,
                OpAction::Insert(doc) => {
                    if current.is_some() {
                        return self.fail(FleetError::store(format!(
                            "{key}: inserted twice in one transaction"
                        )));
                    }
                    Some(doc.clone())
                }
                OpAction::Update(mutations) => {
                    let Some(mut doc) = current else {
                        return self.fail(FleetError::store(format!(
                            "{key}: updated after removal in one transaction"
                        )));
                    };
                    for mutation in mutations {
                        if let Err(e) = mutation.apply(&mut doc) {
                            return self.fail(e.annotate(format!("malformed update of {key}")));
                        }
                    }
                    Some(doc)
                }
                OpAction::Remove => {
                    if current.is_none() {
                        return self.fail(FleetError::store(format!(
                            "{key}: removed twice in one transaction"
                        )));
                    }
                    None
                }
            };
            staged.insert(key, next);
        }

        // Phase 3: install
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        for (key, doc) in staged {
            match doc {
                Some(doc) => {
                    data.insert(
                        key,
                        StoredDocument {
                            doc,
                            txn_revno: revision,
                        },
                    );
                }
                None => {
                    data.remove(&key);
                }
            }
        }
        drop(data);

        self.counters.committed.fetch_add(1, Ordering::Relaxed);
        trace!(target: "fleet::store", revision, ops = ops.len(), "transaction committed");
        Ok(SubmitOutcome::Committed { revision })
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}
