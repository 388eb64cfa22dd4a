//! Document backend interface and its in-memory implementation.
//!
//! A backend stores schemaless JSON documents in named collections. It
//! assigns ids on insert, fills server timestamps on write, and answers
//! queries made of equality/range filters plus an optional ordering field.
//! As with hosted document stores, documents lacking the ordering field are
//! left out of ordered results.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::SecondsFormat;
use dashmap::DashMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::ServerClock;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub fields: Fields,
}

/// Value written to a document field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the backend's clock at write time
    ServerTimestamp,
}

pub type WriteFields = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equal(String, Value),
    AtLeast(String, Value),
    AtMost(String, Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
}

impl DocumentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: Value) -> Self {
        self.filters.push(Filter::Equal(field.to_string(), value));
        self
    }

    pub fn where_gte(mut self, field: &str, value: Value) -> Self {
        self.filters.push(Filter::AtLeast(field.to_string(), value));
        self
    }

    pub fn where_lte(mut self, field: &str, value: Value) -> Self {
        self.filters.push(Filter::AtMost(field.to_string(), value));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("document {0} does not exist")]
    DocumentNotFound(Uuid),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Inserts a document and returns its new id.
    async fn add(&self, collection: &str, fields: WriteFields) -> Result<Uuid, BackendError>;

    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>, BackendError>;

    /// Merges `fields` into an existing document; fails with
    /// [`BackendError::DocumentNotFound`] if it does not exist.
    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        fields: WriteFields,
    ) -> Result<(), BackendError>;

    async fn delete(&self, collection: &str, id: Uuid) -> Result<(), BackendError>;

    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<Document>, BackendError>;
}

/// Process-local document backend.
#[derive(Debug, Default)]
pub struct InMemoryDocumentBackend {
    collections: DashMap<String, HashMap<Uuid, Fields>>,
    clock: ServerClock,
}

impl InMemoryDocumentBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw fields under a chosen id, bypassing server timestamps.
    /// Used to load documents written by other clients.
    pub fn insert_raw(&self, collection: &str, id: Uuid, fields: Fields) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, fields);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    fn resolve(&self, fields: WriteFields) -> Fields {
        let mut resolved = Fields::new();
        let mut timestamp = None;
        for (name, value) in fields {
            let value = match value {
                FieldValue::Value(value) => value,
                FieldValue::ServerTimestamp => {
                    // every timestamp in one write gets the same instant
                    let now = *timestamp.get_or_insert_with(|| self.clock.now());
                    Value::String(now.to_rfc3339_opts(SecondsFormat::Micros, true))
                }
            };
            resolved.insert(name, value);
        }
        resolved
    }
}

#[async_trait]
impl DocumentBackend for InMemoryDocumentBackend {
    async fn add(&self, collection: &str, fields: WriteFields) -> Result<Uuid, BackendError> {
        let id = Uuid::new_v4();
        let fields = self.resolve(fields);
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, fields);
        Ok(id)
    }

    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>, BackendError> {
        Ok(self.collections.get(collection).and_then(|docs| {
            docs.get(&id).map(|fields| Document {
                id,
                fields: fields.clone(),
            })
        }))
    }

    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        fields: WriteFields,
    ) -> Result<(), BackendError> {
        let mut docs = self
            .collections
            .get_mut(collection)
            .ok_or(BackendError::DocumentNotFound(id))?;
        let existing = docs.get_mut(&id).ok_or(BackendError::DocumentNotFound(id))?;
        for (name, value) in self.resolve(fields) {
            existing.insert(name, value);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<(), BackendError> {
        if let Some(mut docs) = self.collections.get_mut(collection) {
            docs.remove(&id);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<Document>, BackendError> {
        let Some(docs) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|(_, fields)| query.filters.iter().all(|filter| matches(filter, fields)))
            .filter(|(_, fields)| match &query.order_by {
                Some((field, _)) => fields.get(field).is_some_and(|v| !v.is_null()),
                None => true,
            })
            .map(|(id, fields)| Document {
                id: *id,
                fields: fields.clone(),
            })
            .collect();
        drop(docs);

        match &query.order_by {
            Some((field, direction)) => matched.sort_by(|a, b| {
                let ordering = compare(&a.fields[field], &b.fields[field])
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id));
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            }),
            None => matched.sort_by_key(|doc| doc.id),
        }
        Ok(matched)
    }
}

fn matches(filter: &Filter, fields: &Fields) -> bool {
    match filter {
        Filter::Equal(field, expected) => fields
            .get(field)
            .is_some_and(|actual| compare(actual, expected) == Some(Ordering::Equal)),
        Filter::AtLeast(field, bound) => fields.get(field).is_some_and(|actual| {
            matches!(compare(actual, bound), Some(Ordering::Greater | Ordering::Equal))
        }),
        Filter::AtMost(field, bound) => fields.get(field).is_some_and(|actual| {
            matches!(compare(actual, bound), Some(Ordering::Less | Ordering::Equal))
        }),
    }
}

/// Orders values of the same JSON type; mixed types never compare.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
