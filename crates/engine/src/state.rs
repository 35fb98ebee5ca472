//! State: the handle every entity snapshot is read and written through
//!
//! A `State` bundles the store client, the transaction runner, the model
//! identity, the endpoint refcount collaborators and the cleanup handler
//! registry. It is cheap to clone; entity snapshots each hold one.
//!
//! No entity owns another. Relations name their applications, applications
//! are found again by name, and the store owns every document.

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use fleetstate_concurrency::{Build, TxnOutcome, TxnRunner};
use fleetstate_core::{
    fields, Assert, Collection, Document, DocumentStore, FleetError, FleetResult, Mutation, Op,
    Query,
};

use crate::application::Application;
use crate::cleanup::{default_handlers, CleanupChange, CleanupKind};
use crate::config::EngineConfig;
use crate::machine::Machine;
use crate::records::{
    ApplicationDoc, ApplicationSource, MachineDoc, RelationDoc, RemoteApplicationDoc,
    SequenceDoc, UnitDoc,
};
use crate::refcount::{EndpointRefcount, LocalApplications, RemoteApplications};
use crate::relation::Relation;
use crate::remote_application::RemoteApplication;
use crate::unit::Unit;

#[derive(Clone)]
struct StateInner {
    store: Arc<dyn DocumentStore>,
    runner: TxnRunner,
    config: EngineConfig,
    model_uuid: String,
    local_refcount: Arc<dyn EndpointRefcount>,
    remote_refcount: Arc<dyn EndpointRefcount>,
    cleanups: Arc<DashMap<CleanupKind, Arc<dyn CleanupChange>>>,
}

/// Handle on one model's persisted topology
#[derive(Clone)]
pub struct State {
    inner: Arc<StateInner>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("model_uuid", &self.inner.model_uuid)
            .field("runner", &self.inner.runner)
            .finish()
    }
}

impl State {
    /// Open a state over `store` with default configuration and a fresh model
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let config = EngineConfig::default();
        let model_uuid = Uuid::new_v4().to_string();
        Self::build(store, config, model_uuid)
    }

    /// Open a state over `store` with `config`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the configuration does not validate.
    pub fn open(store: Arc<dyn DocumentStore>, config: EngineConfig) -> FleetResult<Self> {
        config.validate()?;
        let model_uuid = config
            .model_uuid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(Self::build(store, config, model_uuid))
    }

    fn build(store: Arc<dyn DocumentStore>, config: EngineConfig, model_uuid: String) -> Self {
        let runner = TxnRunner::new(Arc::clone(&store), config.retry_config());
        let cleanups: DashMap<CleanupKind, Arc<dyn CleanupChange>> = DashMap::new();
        for (kind, handler) in default_handlers() {
            cleanups.insert(kind, handler);
        }
        State {
            inner: Arc::new(StateInner {
                store,
                runner,
                config,
                model_uuid,
                local_refcount: Arc::new(LocalApplications),
                remote_refcount: Arc::new(RemoteApplications),
                cleanups: Arc::new(cleanups),
            }),
        }
    }

    /// Replace the collaborator that adjusts remote applications' refcounts
    pub fn with_remote_refcount(mut self, refcount: Arc<dyn EndpointRefcount>) -> Self {
        Arc::make_mut(&mut self.inner).remote_refcount = refcount;
        self
    }

    /// Register (or replace) the handler for a cleanup kind
    pub fn register_cleanup(&self, kind: CleanupKind, handler: Arc<dyn CleanupChange>) {
        self.inner.cleanups.insert(kind, handler);
    }

    pub(crate) fn cleanup_handler(&self, kind: CleanupKind) -> Option<Arc<dyn CleanupChange>> {
        self.inner.cleanups.get(&kind).map(|h| Arc::clone(h.value()))
    }

    /// Model uuid prefixed to every document id
    pub fn model_uuid(&self) -> &str {
        &self.inner.model_uuid
    }

    /// Store client
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Transaction runner
    pub fn runner(&self) -> &TxnRunner {
        &self.inner.runner
    }

    /// Configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Document id of a model-local id (`<model-uuid>:<local-id>`)
    pub fn doc_id(&self, local_id: &str) -> String {
        format!("{}:{}", self.inner.model_uuid, local_id)
    }

    /// Model-local id of a document id, if it belongs to this model
    pub fn local_id<'a>(&self, doc_id: &'a str) -> Option<&'a str> {
        doc_id
            .strip_prefix(self.inner.model_uuid.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }

    /// Query matching every document of this model
    pub(crate) fn model_query(&self) -> Query {
        Query::id_prefix(self.doc_id(""))
    }

    /// Refcount collaborator for an endpoint's application
    pub(crate) fn refcount_for(&self, source: ApplicationSource) -> &dyn EndpointRefcount {
        match source {
            ApplicationSource::Local => self.inner.local_refcount.as_ref(),
            ApplicationSource::Remote => self.inner.remote_refcount.as_ref(),
        }
    }

    /// Read and decode one record
    pub(crate) fn read<T: DeserializeOwned>(
        &self,
        collection: Collection,
        doc_id: &str,
    ) -> FleetResult<Option<T>> {
        match self.inner.store.get(collection, doc_id)? {
            Some(doc) => Ok(Some(doc.to_record()?)),
            None => Ok(None),
        }
    }

    /// Read one record, failing with `NotFound` naming `entity`
    pub(crate) fn read_existing<T: DeserializeOwned>(
        &self,
        collection: Collection,
        doc_id: &str,
        entity: impl FnOnce() -> String,
    ) -> FleetResult<T> {
        self.read(collection, doc_id)?
            .ok_or_else(|| FleetError::not_found(entity()))
    }

    /// Decode every record of this model in `collection` matching `filter`
    pub(crate) fn find_records<T: DeserializeOwned>(
        &self,
        collection: Collection,
        filter: Option<Assert>,
    ) -> FleetResult<Vec<T>> {
        let mut query = self.model_query();
        query.filter = filter;
        self.inner
            .store
            .find(collection, &query)?
            .into_iter()
            .map(|(_, doc)| doc.to_record())
            .collect()
    }

    /// Allocate the next value of a named sequence
    ///
    /// The first value handed out is 0.
    pub fn sequence(&self, name: &str) -> FleetResult<i64> {
        let id = self.doc_id(name);
        let mut allocated = 0;
        let outcome = self.runner().run(|_| {
            match self.inner.store.get(Collection::Sequences, &id)? {
                None => {
                    allocated = 0;
                    let doc = Document::from_record(&SequenceDoc {
                        name: name.to_string(),
                        model_uuid: self.inner.model_uuid.clone(),
                        counter: 1,
                    })?;
                    Ok(Build::ops(vec![Op::insert(Collection::Sequences, &id, doc)]))
                }
                Some(doc) => {
                    let counter = doc.get_i64(fields::COUNTER).ok_or_else(|| {
                        FleetError::store(format!("sequence {name:?} has no counter"))
                    })?;
                    allocated = counter;
                    Ok(Build::ops(vec![Op::update(
                        Collection::Sequences,
                        &id,
                        vec![Mutation::inc(fields::COUNTER, 1)],
                    )
                    .with_assert(Assert::field_eq(fields::COUNTER, counter))]))
                }
            }
        })?;
        match outcome {
            TxnOutcome::Committed { .. } => Ok(allocated),
            TxnOutcome::NoOpNeeded { .. } => Err(FleetError::store(format!(
                "sequence {name:?} allocated nothing"
            ))),
        }
    }

    /// Relation by key
    pub fn relation(&self, key: &str) -> FleetResult<Relation> {
        let doc: RelationDoc = self.read_existing(Collection::Relations, &self.doc_id(key), || {
            format!("relation {key:?}")
        })?;
        Ok(Relation::new(self.clone(), doc))
    }

    /// Relation by incarnation id
    pub fn relation_by_id(&self, id: i64) -> FleetResult<Relation> {
        let mut docs: Vec<RelationDoc> = self.find_records(
            Collection::Relations,
            Some(Assert::field_eq(fields::RELATION_ID, id)),
        )?;
        match docs.pop() {
            Some(doc) => Ok(Relation::new(self.clone(), doc)),
            None => Err(FleetError::not_found(format!("relation {id}"))),
        }
    }

    /// Every relation of this model, sorted by key
    pub fn relations(&self) -> FleetResult<Vec<Relation>> {
        Ok(self
            .find_records::<RelationDoc>(Collection::Relations, None)?
            .into_iter()
            .map(|doc| Relation::new(self.clone(), doc))
            .collect())
    }

    /// Relations with an endpoint on the named application
    pub(crate) fn relations_of(&self, application: &str) -> FleetResult<Vec<Relation>> {
        Ok(self
            .relations()?
            .into_iter()
            .filter(|r| r.endpoint(application).is_ok())
            .collect())
    }

    /// Local application by name
    pub fn application(&self, name: &str) -> FleetResult<Application> {
        let doc: ApplicationDoc =
            self.read_existing(Collection::Applications, &self.doc_id(name), || {
                format!("application {name:?}")
            })?;
        Ok(Application::new(self.clone(), doc))
    }

    /// Remote application by name
    pub fn remote_application(&self, name: &str) -> FleetResult<RemoteApplication> {
        let doc: RemoteApplicationDoc =
            self.read_existing(Collection::RemoteApplications, &self.doc_id(name), || {
                format!("remote application {name:?}")
            })?;
        Ok(RemoteApplication::new(self.clone(), doc))
    }

    /// Unit by name
    pub fn unit(&self, name: &str) -> FleetResult<Unit> {
        let doc: UnitDoc = self.read_existing(Collection::Units, &self.doc_id(name), || {
            format!("unit {name:?}")
        })?;
        Ok(Unit::new(self.clone(), doc))
    }

    /// Machine by id
    pub fn machine(&self, id: &str) -> FleetResult<Machine> {
        let doc: MachineDoc = self.read_existing(Collection::Machines, &self.doc_id(id), || {
            format!("machine {id:?}")
        })?;
        Ok(Machine::new(self.clone(), doc))
    }
}
