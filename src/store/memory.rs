//! In-process document store.
//!
//! Implements the whole [`DocumentStore`] contract over in-memory collections:
//! dotted-path field updates, ordered/limited queries, composite-index
//! requirements, and realtime push of full snapshots. Used by the sandbox
//! binary and by tests, which can take it offline or inject failures per call.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    compare_values, Direction, Document, DocumentCallback, DocumentStore, FieldUpdate,
    Fields, FilterOp, Precondition, Query, QueryCallback, StoreError, Subscription,
};

/// Capacity of the change-notification channel feeding subscriptions.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A call made against the store, recorded for inspection and failure rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get { collection: String, id: String },
    Set { collection: String, id: String },
    Add { collection: String },
    Update { collection: String, id: String, fields: Vec<String> },
    Query { collection: String },
}

impl StoreCall {
    /// Collection the call targets.
    pub fn collection(&self) -> &str {
        match self {
            StoreCall::Get { collection, .. }
            | StoreCall::Set { collection, .. }
            | StoreCall::Add { collection }
            | StoreCall::Update { collection, .. }
            | StoreCall::Query { collection } => collection,
        }
    }

    /// Whether an update call writes `field` or one of its nested paths.
    pub fn touches(&self, field: &str) -> bool {
        match self {
            StoreCall::Update { fields, .. } => fields.iter().any(|f| {
                f == field || f.starts_with(&format!("{}.", field))
            }),
            _ => false,
        }
    }
}

type FailureRule = Box<dyn Fn(&StoreCall) -> Option<StoreError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CompositeIndex {
    collection: String,
    equality_fields: Vec<String>,
    order_field: String,
}

struct Inner {
    collections: RwLock<HashMap<String, BTreeMap<String, Fields>>>,
    changes: broadcast::Sender<String>,
    composite_indexes: RwLock<HashSet<CompositeIndex>>,
    failures: RwLock<Vec<FailureRule>>,
    offline: AtomicBool,
    calls: Mutex<Vec<StoreCall>>,
}

/// In-memory document store. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(HashMap::new()),
                changes,
                composite_indexes: RwLock::new(HashSet::new()),
                failures: RwLock::new(Vec::new()),
                offline: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Provision a composite index allowing equality filters on several fields
    /// combined with ordering on another field.
    pub fn add_composite_index(&self, collection: &str, equality_fields: &[&str], order_field: &str) {
        let mut fields: Vec<String> = equality_fields.iter().map(|f| f.to_string()).collect();
        fields.sort();
        fields.dedup();
        self.inner
            .composite_indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(CompositeIndex {
                collection: collection.to_string(),
                equality_fields: fields,
                order_field: order_field.to_string(),
            });
    }

    /// Simulate loss of connectivity: every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Fail any call for which `rule` returns an error.
    pub fn fail_when(&self, rule: impl Fn(&StoreCall) -> Option<StoreError> + Send + Sync + 'static) {
        self.inner
            .failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(rule));
    }

    /// Remove all failure rules.
    pub fn clear_failures(&self) {
        self.inner
            .failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of documents in a collection.
    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn check(&self, call: StoreCall) -> Result<(), StoreError> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());

        if self.inner.offline.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable("network offline".to_string()));
        }

        let failures = self.inner.failures.read().unwrap_or_else(PoisonError::into_inner);
        match failures.iter().find_map(|rule| rule(&call)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn notify(&self, collection: &str) {
        // No receivers simply means nobody is subscribed.
        let _ = self.inner.changes.send(collection.to_string());
    }

    fn validate(&self, query: &Query) -> Result<(), StoreError> {
        let equality: BTreeSet<&str> = query
            .filters
            .iter()
            .filter(|f| f.op == FilterOp::Eq)
            .map(|f| f.field.as_str())
            .collect();
        let range: BTreeSet<&str> = query
            .filters
            .iter()
            .filter(|f| f.op != FilterOp::Eq)
            .map(|f| f.field.as_str())
            .collect();

        if range.len() > 1 {
            return Err(StoreError::Query(
                "range filters are only supported on a single field".to_string(),
            ));
        }

        let Some(order) = &query.order_by else {
            return Ok(());
        };

        if let Some(range_field) = range.iter().next() {
            if *range_field != order.field {
                return Err(StoreError::Query(format!(
                    "range filter on '{}' requires ordering by that field first",
                    range_field
                )));
            }
        }

        if equality.len() > 1 && !equality.contains(order.field.as_str()) {
            let index = CompositeIndex {
                collection: query.collection.clone(),
                equality_fields: equality.iter().map(|f| f.to_string()).collect(),
                order_field: order.field.clone(),
            };
            let indexes = self
                .inner
                .composite_indexes
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if !indexes.contains(&index) {
                return Err(StoreError::MissingIndex(format!(
                    "{} on ({}) ordered by {}",
                    query.collection,
                    index.equality_fields.join(", "),
                    order.field
                )));
            }
        }

        Ok(())
    }

    fn evaluate(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.validate(query)?;

        let collections = self
            .inner
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut documents: Vec<Document> = collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| query.matches(fields))
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            documents.retain(|doc| doc.get(&order.field).is_some());
            documents.sort_by(|a, b| {
                let ordering = match (a.get(&order.field), b.get(&order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    _ => std::cmp::Ordering::Equal,
                };
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            documents.truncate(limit);
        }

        Ok(documents)
    }

    fn read_document(&self, collection: &str, id: &str) -> Option<Document> {
        self.inner
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone()))
    }

    /// Check preconditions and apply updates under one write lock. Returns
    /// `false` without writing when a precondition does not hold.
    fn write_fields(
        &self,
        collection: &str,
        id: &str,
        preconditions: &[Precondition],
        updates: &[(String, FieldUpdate)],
    ) -> Result<bool, StoreError> {
        {
            let mut collections = self
                .inner
                .collections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let stored = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            if !preconditions.iter().all(|p| p.holds(stored)) {
                return Ok(false);
            }

            // Apply to a copy so a bad path leaves the document untouched.
            let mut next = stored.clone();
            for (path, update) in updates {
                apply_update(&mut next, path, update)?;
            }
            *stored = next;
        }

        self.notify(collection);
        Ok(true)
    }

    fn spawn_feed(
        &self,
        collection: String,
        push: impl Fn(&MemoryStore) + Send + Sync + 'static,
    ) -> Result<Subscription, StoreError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Unavailable("no async runtime for realtime delivery".to_string())
        })?;

        // Subscribe before the first snapshot so no change slips in between.
        let mut changes = self.inner.changes.subscribe();
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let store = self.clone();

        let task = runtime.spawn(async move {
            let deliver = |store: &MemoryStore| {
                if flag.load(AtomicOrdering::SeqCst) {
                    push(store);
                }
            };

            deliver(&store);
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == collection => deliver(&store),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Subscription lagged by {} changes, resending snapshot", skipped);
                        deliver(&store);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::from_task(active, task))
    }
}

impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check(StoreCall::Get {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;
        Ok(self.read_document(collection, id))
    }

    async fn set(&self, collection: &str, document: Document) -> Result<(), StoreError> {
        self.check(StoreCall::Set {
            collection: collection.to_string(),
            id: document.id.clone(),
        })?;
        self.inner
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .insert(document.id, document.fields);
        self.notify(collection);
        Ok(())
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        self.check(StoreCall::Add {
            collection: collection.to_string(),
        })?;
        let id = Uuid::new_v4().simple().to_string();
        self.inner
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        self.notify(collection);
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<(), StoreError> {
        self.check(StoreCall::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields: updates.iter().map(|(field, _)| field.clone()).collect(),
        })?;

        self.write_fields(collection, id, &[], &updates)?;
        Ok(())
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        preconditions: Vec<Precondition>,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<bool, StoreError> {
        self.check(StoreCall::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields: updates.iter().map(|(field, _)| field.clone()).collect(),
        })?;
        self.write_fields(collection, id, &preconditions, &updates)
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.check(StoreCall::Query {
            collection: query.collection.clone(),
        })?;
        self.evaluate(query)
    }

    fn subscribe_query(
        &self,
        query: Query,
        on_change: QueryCallback,
    ) -> Result<Subscription, StoreError> {
        tracing::debug!("Opening realtime feed on {}", query.collection);
        let collection = query.collection.clone();
        self.spawn_feed(collection, move |store| on_change(store.evaluate(&query)))
    }

    fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
        on_change: DocumentCallback,
    ) -> Result<Subscription, StoreError> {
        tracing::debug!("Opening realtime feed on {}/{}", collection, id);
        let owned_collection = collection.to_string();
        let id = id.to_string();
        self.spawn_feed(collection.to_string(), move |store| {
            on_change(Ok(store.read_document(&owned_collection, &id)))
        })
    }
}

/// Apply one update primitive at a dotted path, creating intermediate maps.
fn apply_update(fields: &mut Fields, path: &str, update: &FieldUpdate) -> Result<(), StoreError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop().filter(|s| !s.is_empty()) else {
        return Err(StoreError::Query(format!("invalid field path '{}'", path)));
    };

    let mut target: &mut Fields = fields;
    for segment in segments {
        let entry = target
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        target = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::Query(format!(
                    "field '{}' in path '{}' is not a map",
                    segment, path
                )))
            }
        };
    }

    match update {
        FieldUpdate::Set(value) => {
            target.insert(leaf.to_string(), value.clone());
        }
        FieldUpdate::Delete => {
            target.remove(leaf);
        }
        FieldUpdate::Increment(delta) => {
            let current = match target.get(leaf) {
                None | Some(Value::Null) => 0,
                Some(value) => value.as_i64().ok_or_else(|| {
                    StoreError::Query(format!("field '{}' is not an integer", path))
                })?,
            };
            target.insert(leaf.to_string(), Value::from(current + delta));
        }
        FieldUpdate::ArrayUnion(items) => {
            let entry = target
                .entry(leaf.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Value::Array(array) = entry {
                for item in items {
                    if !array.contains(item) {
                        array.push(item.clone());
                    }
                }
            }
        }
        FieldUpdate::ArrayRemove(items) => {
            if let Some(Value::Array(array)) = target.get_mut(leaf) {
                array.retain(|value| !items.contains(value));
            }
        }
    }

    Ok(())
}
