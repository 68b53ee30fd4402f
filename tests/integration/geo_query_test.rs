//! Integration tests for radius search over geohash ranges.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use foodloop::config::DiscoverySettings;
use foodloop::geo::{query_bounds, GeoIndex};
use foodloop::listings::repository::build_listing;
use foodloop::listings::{Listing, UploaderRef, LISTINGS_COLLECTION};
use foodloop::store::{
    Document, DocumentCallback, FieldUpdate, Fields, Precondition, Query, QueryCallback, StoreError,
    Subscription,
};
use foodloop::{Coordinate, DocumentStore, ListingDraft, MemoryStore};

fn listing(id: &str, at: Coordinate) -> Listing {
    let draft = ListingDraft::new(format!("item {}", id), "蔬菜", Utc::now() + Duration::days(2)).at(at);
    build_listing(
        draft,
        id,
        "uploader",
        UploaderRef::new("小明", 0),
        &DiscoverySettings::default(),
        Utc::now(),
    )
    .unwrap()
}

/// Store whose range queries all return one extra shared document, the way
/// overlapping pages from adjacent ranges do.
struct OverlappingStore {
    inner: MemoryStore,
    shared: Document,
    queries: AtomicUsize,
}

impl DocumentStore for OverlappingStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: &str, document: Document) -> Result<(), StoreError> {
        self.inner.set(collection, document).await
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        self.inner.add(collection, fields).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<(), StoreError> {
        self.inner.update(collection, id, updates).await
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        preconditions: Vec<Precondition>,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<bool, StoreError> {
        self.inner.update_if(collection, id, preconditions, updates).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut page = self.inner.query(query).await?;
        page.push(self.shared.clone());
        Ok(page)
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

async fn seed(store: &MemoryStore, listing: &Listing) {
    store
        .set(LISTINGS_COLLECTION, Document::from_serializable(&listing.id, listing).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_overlapping_pages_are_deduplicated() {
    let center = Coordinate::new(25.0330, 121.5654);
    let shared = listing("shared", Coordinate::new(25.0335, 121.5650));
    let inner = MemoryStore::new();
    seed(&inner, &listing("own", Coordinate::new(25.0340, 121.5660))).await;

    let store = Arc::new(OverlappingStore {
        inner,
        shared: Document::from_serializable("shared", &shared).unwrap(),
        queries: AtomicUsize::new(0),
    });
    let index = GeoIndex::new(Arc::clone(&store), LISTINGS_COLLECTION, 50);
    let results = index.query_near(center, 1.0).await.unwrap();

    assert!(store.queries.load(Ordering::SeqCst) > 1);
    let shared_hits = results.iter().filter(|n| n.listing.id == "shared").count();
    assert_eq!(shared_hits, 1);
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_no_false_negatives_or_false_positives() {
    let store = Arc::new(MemoryStore::new());
    let center = Coordinate::new(25.0330, 121.5654);
    let radius_km = 3.0;

    // Ring of points inside and just outside the radius.
    let mut expected_inside = Vec::new();
    for step in 0..16 {
        let bearing = step as f64 * std::f64::consts::PI / 8.0;
        for (label, fraction) in [("in", 0.9), ("out", 1.2)] {
            let dlat = fraction * radius_km / 111.32 * bearing.cos();
            let dlon = fraction * radius_km / (111.32 * center.latitude.to_radians().cos()) * bearing.sin();
            let id = format!("{}-{}", label, step);
            seed(&store, &listing(&id, Coordinate::new(center.latitude + dlat, center.longitude + dlon))).await;
            if label == "in" {
                expected_inside.push(id);
            }
        }
    }

    let index = GeoIndex::new(Arc::clone(&store), LISTINGS_COLLECTION, 500);
    let results = index.query_near(center, radius_km).await.unwrap();

    for id in &expected_inside {
        assert!(results.iter().any(|n| &n.listing.id == id), "missing {}", id);
    }
    assert!(results.iter().all(|n| n.distance_m <= radius_km * 1000.0));
    assert_eq!(results.len(), expected_inside.len());
    assert!(results.windows(2).all(|w| w[0].distance_m <= w[1].distance_m));
}

#[test]
fn test_bounds_stay_small() {
    let bounds = query_bounds(Coordinate::new(25.0330, 121.5654), 10_000.0);
    assert!(!bounds.is_empty());
    assert!(bounds.len() <= 9);
}
