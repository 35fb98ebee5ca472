//! Conditional operations
//!
//! An operation set is a batch of assert-then-mutate operations that a
//! [`DocumentStore`](crate::DocumentStore) commits atomically: every assertion
//! is checked against the pre-transaction state, and if any fails nothing is
//! applied.
//!
//! ## Assertions
//!
//! Assertions double as optimistic version checks. Any field named in an
//! assertion behaves like a revision marker: if a concurrent writer changed it,
//! the whole set is rejected and the builder gets another look at fresh state.
//!
//! ## Refcount discipline
//!
//! Decrements of reference-count fields are always emitted together with an
//! assertion that the pre-decrement value is positive (see [`Op::decrement`]),
//! so a committed set can never drive a count below zero.

use serde_json::Value;
use std::fmt;

use crate::document::Document;
use crate::life::Life;
use crate::types::{fields, Collection};

/// Precondition on a single document
#[derive(Debug, Clone, PartialEq)]
pub enum Assert {
    /// Document must exist
    DocExists,
    /// Document must not exist
    DocMissing,
    /// Field must equal the value
    Eq(String, Value),
    /// Field must differ from the value (a missing field differs from everything)
    Ne(String, Value),
    /// Integer field must be strictly greater than the bound
    Gt(String, i64),
    /// Field must be present
    FieldExists(String),
    /// Every inner assertion must hold
    And(Vec<Assert>),
    /// At least one inner assertion must hold
    Or(Vec<Assert>),
}

impl Assert {
    /// `field == value`
    pub fn field_eq(field: &str, value: impl Into<Value>) -> Self {
        Assert::Eq(field.to_string(), value.into())
    }

    /// `field != value`
    pub fn field_ne(field: &str, value: impl Into<Value>) -> Self {
        Assert::Ne(field.to_string(), value.into())
    }

    /// `field > bound`
    pub fn gt(field: &str, bound: i64) -> Self {
        Assert::Gt(field.to_string(), bound)
    }

    /// `field` is present
    pub fn exists(field: &str) -> Self {
        Assert::FieldExists(field.to_string())
    }

    /// `life == life`
    pub fn life(life: Life) -> Self {
        Assert::field_eq(fields::LIFE, life)
    }

    /// `life == alive`
    pub fn is_alive() -> Self {
        Assert::life(Life::Alive)
    }

    /// `life != dead`
    pub fn not_dead() -> Self {
        Assert::field_ne(fields::LIFE, Life::Dead)
    }

    /// Combine with another assertion (flattening nested `And`s)
    pub fn and(self, other: Assert) -> Self {
        match (self, other) {
            (Assert::And(mut left), Assert::And(right)) => {
                left.extend(right);
                Assert::And(left)
            }
            (Assert::And(mut left), other) => {
                left.push(other);
                Assert::And(left)
            }
            (this, Assert::And(mut right)) => {
                right.insert(0, this);
                Assert::And(right)
            }
            (this, other) => Assert::And(vec![this, other]),
        }
    }

    /// Evaluate against the current state of a document (`None` = missing)
    ///
    /// Field assertions on a missing document fail.
    pub fn matches(&self, doc: Option<&Document>) -> bool {
        match self {
            Assert::DocExists => doc.is_some(),
            Assert::DocMissing => doc.is_none(),
            Assert::Eq(field, expected) => doc.and_then(|d| d.get(field)) == Some(expected),
            Assert::Ne(field, unexpected) => match doc {
                Some(d) => d.get(field) != Some(unexpected),
                None => false,
            },
            Assert::Gt(field, bound) => doc
                .and_then(|d| d.get_i64(field))
                .map_or(false, |v| v > *bound),
            Assert::FieldExists(field) => doc.and_then(|d| d.get(field)).is_some(),
            Assert::And(inner) => doc.is_some() && inner.iter().all(|a| a.matches(doc)),
            Assert::Or(inner) => doc.is_some() && inner.iter().any(|a| a.matches(doc)),
        }
    }

    /// Whether this assertion guarantees `field > bound'` for some `bound' >= bound`
    ///
    /// Used to check the refcount discipline on emitted decrements.
    pub fn guarantees_gt(&self, field: &str, bound: i64) -> bool {
        match self {
            Assert::Gt(f, b) => f == field && *b >= bound,
            Assert::Eq(f, v) => f == field && v.as_i64().map_or(false, |v| v > bound),
            Assert::And(inner) => inner.iter().any(|a| a.guarantees_gt(field, bound)),
            Assert::Or(inner) => {
                !inner.is_empty() && inner.iter().all(|a| a.guarantees_gt(field, bound))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Assert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assert::DocExists => f.write_str("exists"),
            Assert::DocMissing => f.write_str("missing"),
            Assert::Eq(field, v) => write!(f, "{field} == {v}"),
            Assert::Ne(field, v) => write!(f, "{field} != {v}"),
            Assert::Gt(field, b) => write!(f, "{field} > {b}"),
            Assert::FieldExists(field) => write!(f, "{field} exists"),
            Assert::And(inner) => write_joined(f, inner, " && "),
            Assert::Or(inner) => write_joined(f, inner, " || "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, inner: &[Assert], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, a) in inner.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{a}")?;
    }
    f.write_str(")")
}

/// Field-level change applied by an update
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Set a field
    Set(String, Value),
    /// Add to an integer field
    Inc(String, i64),
}

impl Mutation {
    /// Set `field` to `value`
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        Mutation::Set(field.to_string(), value.into())
    }

    /// Add `delta` to `field`
    pub fn inc(field: &str, delta: i64) -> Self {
        Mutation::Inc(field.to_string(), delta)
    }

    /// Apply to a document
    pub fn apply(&self, doc: &mut Document) -> crate::FleetResult<()> {
        match self {
            Mutation::Set(field, value) => doc.set(field, value.clone()),
            Mutation::Inc(field, delta) => doc.inc(field, *delta),
        }
    }
}

/// What an operation does once its assertion holds
#[derive(Debug, Clone, PartialEq)]
pub enum OpAction {
    /// Nothing; the op exists only for its assertion
    AssertOnly,
    /// Insert a new document (requires the document to be missing)
    Insert(Document),
    /// Modify an existing document
    Update(Vec<Mutation>),
    /// Remove an existing document
    Remove,
}

/// One conditional operation on one document
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    /// Target collection
    pub collection: Collection,
    /// Target document id
    pub id: String,
    /// Precondition (in addition to the action's implicit existence check)
    pub assert: Option<Assert>,
    /// Effect
    pub action: OpAction,
}

impl Op {
    /// Assertion-only operation
    pub fn assert(collection: Collection, id: impl Into<String>, assert: Assert) -> Self {
        Op {
            collection,
            id: id.into(),
            assert: Some(assert),
            action: OpAction::AssertOnly,
        }
    }

    /// Insert operation
    pub fn insert(collection: Collection, id: impl Into<String>, doc: Document) -> Self {
        Op {
            collection,
            id: id.into(),
            assert: Some(Assert::DocMissing),
            action: OpAction::Insert(doc),
        }
    }

    /// Update operation
    pub fn update(collection: Collection, id: impl Into<String>, mutations: Vec<Mutation>) -> Self {
        Op {
            collection,
            id: id.into(),
            assert: None,
            action: OpAction::Update(mutations),
        }
    }

    /// Remove operation
    pub fn remove(collection: Collection, id: impl Into<String>) -> Self {
        Op {
            collection,
            id: id.into(),
            assert: None,
            action: OpAction::Remove,
        }
    }

    /// Decrement `field` by one, asserting its pre-decrement value is positive
    ///
    /// `extra` is conjoined with the positivity check.
    pub fn decrement(
        collection: Collection,
        id: impl Into<String>,
        field: &str,
        extra: Option<Assert>,
    ) -> Self {
        let positive = Assert::gt(field, 0);
        let assert = match extra {
            Some(extra) => positive.and(extra),
            None => positive,
        };
        Op::update(collection, id, vec![Mutation::inc(field, -1)]).with_assert(assert)
    }

    /// Replace the assertion
    pub fn with_assert(mut self, assert: Assert) -> Self {
        self.assert = Some(assert);
        self
    }

    /// Whether this op removes its document
    pub fn is_remove(&self) -> bool {
        matches!(self.action, OpAction::Remove)
    }

    /// Negative increments this op applies, as `(field, delta)` pairs
    pub fn decrements(&self) -> Vec<(&str, i64)> {
        match &self.action {
            OpAction::Update(mutations) => mutations
                .iter()
                .filter_map(|m| match m {
                    Mutation::Inc(field, delta) if *delta < 0 => Some((field.as_str(), *delta)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Lookup within one collection
///
/// All set criteria must match. Results are returned sorted by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Exact id
    pub id: Option<String>,
    /// Id prefix
    pub id_prefix: Option<String>,
    /// Predicate over the document
    pub filter: Option<Assert>,
}

impl Query {
    /// Match every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Match exactly one id
    pub fn id(id: impl Into<String>) -> Self {
        Query {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Match ids starting with `prefix`
    pub fn id_prefix(prefix: impl Into<String>) -> Self {
        Query {
            id_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Add a predicate
    pub fn matching(mut self, filter: Assert) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Evaluate against a stored document
    pub fn matches(&self, id: &str, doc: &Document) -> bool {
        if let Some(want) = &self.id {
            if want != id {
                return false;
            }
        }
        if let Some(prefix) = &self.id_prefix {
            if !id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        self.filter.as_ref().map_or(true, |f| f.matches(Some(doc)))
    }
}
