//! Remote document store contract.
//!
//! The core never talks to a concrete backend. Everything it needs from the
//! remote database is expressed by [`DocumentStore`]: keyed get/set/update with
//! field-level increment and array union/remove, ordered and limited queries,
//! and realtime subscriptions that push the full current result on every change.

pub mod memory;
pub mod subscription;

pub use memory::{MemoryStore, StoreCall};
pub use subscription::Subscription;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

/// Field map of a stored document.
pub type Fields = Map<String, Value>;

/// Callback receiving the full result set of a query on every change.
pub type QueryCallback = Arc<dyn Fn(Result<Vec<Document>, StoreError>) + Send + Sync>;

/// Callback receiving the current state of a single document on every change.
/// `None` means the document does not exist.
pub type DocumentCallback = Arc<dyn Fn(Result<Option<Document>, StoreError>) + Send + Sync>;

/// A stored document: an opaque id plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    /// Create a document from raw fields.
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Serialize a value into document fields. An `id` field, if present, is
    /// lifted out of the field map since ids live on the document key.
    pub fn from_serializable<T: Serialize>(id: impl Into<String>, value: &T) -> Result<Self, StoreError> {
        Ok(Self::new(id, to_fields(value)?))
    }

    /// Decode the document into a typed value, exposing the key as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(StoreError::from)
    }

    /// Look up a field by dotted path (`"challenges.sharing.progress"`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.fields, path)
    }
}

/// Serialize a value into a field map, dropping any `id` key.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        other => Err(StoreError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Field-level update primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Replace the field value.
    Set(Value),
    /// Atomically add to a numeric field (missing counts as 0).
    Increment(i64),
    /// Append the values not already present in the array.
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of the values from the array.
    ArrayRemove(Vec<Value>),
    /// Remove the field.
    Delete,
}

impl FieldUpdate {
    /// Convenience constructor for `Set` from anything convertible to JSON.
    pub fn set(value: impl Into<Value>) -> Self {
        FieldUpdate::Set(value.into())
    }
}

/// Expected state of one field for a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub struct Precondition {
    pub field: String,
    /// `None` requires the field to be absent.
    pub expected: Option<Value>,
}

impl Precondition {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            expected: Some(value.into()),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expected: None,
        }
    }

    /// Whether the field currently holds exactly the expected value.
    pub fn holds(&self, fields: &Fields) -> bool {
        lookup(fields, &self.field) == self.expected.as_ref()
    }
}

/// Comparison used by a query filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Gte,
    Lt,
}

/// A single query predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// Whether the given fields satisfy this predicate. Missing fields never match.
    pub fn matches(&self, fields: &Fields) -> bool {
        let Some(actual) = lookup(fields, &self.field) else {
            return false;
        };
        if type_rank(actual) != type_rank(&self.value) {
            return false;
        }
        let ordering = compare_values(actual, &self.value);
        match self.op {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Gte => ordering != Ordering::Less,
            FilterOp::Lt => ordering == Ordering::Less,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Server-side ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    /// Start a query over a collection.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn where_gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gte, value)
    }

    pub fn where_lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lt, value)
    }

    fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Copy of this query without server-side ordering.
    pub fn without_order(&self) -> Self {
        Self {
            order_by: None,
            ..self.clone()
        }
    }

    /// Whether a document's fields satisfy every filter.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|f| f.matches(fields))
    }
}

/// Store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Query requires a composite index: {0}")]
    MissingIndex(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Write conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Transient failures that are safe to retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Query(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Document-oriented remote store consumed by the core.
///
/// Every async method is a suspension point; implementations must not apply
/// a write partially when they return an error.
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch a document by id.
    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send;

    /// Create or replace a document under a caller-chosen id.
    fn set(
        &self,
        collection: &str,
        document: Document,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Create a document and let the store assign its durable id.
    fn add(
        &self,
        collection: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Apply field updates to an existing document as one atomic write.
    /// Fails with [`StoreError::NotFound`] when the document is absent.
    fn update(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<(String, FieldUpdate)>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply field updates only if every precondition holds, checked and
    /// written as one atomic step. Returns `false`, writing nothing, when a
    /// precondition does not hold.
    fn update_if(
        &self,
        collection: &str,
        id: &str,
        preconditions: Vec<Precondition>,
        updates: Vec<(String, FieldUpdate)>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Run a query.
    fn query(&self, query: &Query) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send;

    /// Push the full result of `query` now and after every change to it.
    fn subscribe_query(
        &self,
        query: Query,
        on_change: QueryCallback,
    ) -> Result<Subscription, StoreError>;

    /// Push the current state of one document now and after every change to it.
    fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
        on_change: DocumentCallback,
    ) -> Result<Subscription, StoreError>;
}

/// Resolve a dotted field path.
pub fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = fields.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: by type first, then by value within a type.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
