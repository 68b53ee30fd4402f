//! Shared fixtures for the scenario tests.

use std::sync::Arc;
use std::time::Duration;

use foodloop::listings::USERS_COLLECTION;
use foodloop::social::ProfileDocument;
use foodloop::store::{
    Document, DocumentCallback, FieldUpdate, Fields, Precondition, Query, QueryCallback, StoreError,
    Subscription,
};
use foodloop::{AppConfig, DocumentStore, Identity, MemoryStore, Session};

pub fn new_session() -> (Arc<MemoryStore>, Session<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let session = Session::new(Arc::clone(&store), AppConfig::default(), None);
    (store, session)
}

pub fn identity() -> Identity {
    Identity::new("u1", "小明").with_email("ming@example.com")
}

pub async fn profile(store: &MemoryStore, user_id: &str) -> ProfileDocument {
    store
        .get(USERS_COLLECTION, user_id)
        .await
        .unwrap()
        .expect("profile exists")
        .decode()
        .unwrap()
}

/// Overwrite one challenge record directly in the store.
pub async fn set_challenge(store: &MemoryStore, user_id: &str, key: &str, progress: u32, goal: u32) {
    store
        .update(
            USERS_COLLECTION,
            user_id,
            vec![(
                format!("challenges.{}", key),
                FieldUpdate::set(serde_json::json!({ "progress": progress, "goal": goal })),
            )],
        )
        .await
        .unwrap();
}

/// Let spawned feed tasks deliver pending pushes.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Store that yields to the scheduler before every call, so concurrent flows
/// interleave between their reads and writes.
pub struct YieldingStore {
    inner: MemoryStore,
}

impl YieldingStore {
    pub fn new(inner: &MemoryStore) -> Arc<Self> {
        Arc::new(Self { inner: inner.clone() })
    }
}

impl DocumentStore for YieldingStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: &str, document: Document) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.set(collection, document).await
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        tokio::task::yield_now().await;
        self.inner.add(collection, fields).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.update(collection, id, updates).await
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        preconditions: Vec<Precondition>,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        self.inner.update_if(collection, id, preconditions, updates).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.query(query).await
    }

    fn subscribe_query(&self, query: Query, on_change: QueryCallback) -> Result<Subscription, StoreError> {
        self.inner.subscribe_query(query, on_change)
    }

    fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
        on_change: DocumentCallback,
    ) -> Result<Subscription, StoreError> {
        self.inner.subscribe_document(collection, id, on_change)
    }
}
