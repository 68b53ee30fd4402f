//! Radius search over listings stored with a geohash field.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;

use super::distance::{haversine_distance, Coordinate};
use super::geohash::query_bounds;
use crate::listings::Listing;
use crate::store::{Direction, DocumentStore, Query, StoreError};

/// A listing found by a radius search.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyListing {
    pub listing: Listing,
    /// Great-circle distance from the search center in meters.
    pub distance_m: f64,
}

/// Radius search adapter over a [`DocumentStore`] collection.
pub struct GeoIndex<S: DocumentStore> {
    store: Arc<S>,
    collection: String,
    per_range_limit: usize,
}

impl<S: DocumentStore> GeoIndex<S> {
    pub fn new(store: Arc<S>, collection: impl Into<String>, per_range_limit: usize) -> Self {
        Self {
            store,
            collection: collection.into(),
            per_range_limit,
        }
    }

    /// Active listings within `radius_km` of `center`, nearest first.
    ///
    /// One range query is issued per geohash bound, concurrently. Any failed
    /// range fails the whole search. Documents returned by several ranges are
    /// counted once and every result is checked against the exact radius.
    pub async fn query_near(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<NearbyListing>, StoreError> {
        let radius_m = radius_km * 1000.0;
        let bounds = query_bounds(center, radius_m);
        tracing::debug!(
            "Radius query at ({:.4}, {:.4}) r={}km over {} ranges",
            center.latitude,
            center.longitude,
            radius_km,
            bounds.len()
        );

        let queries = bounds.into_iter().map(|range| {
            let query = Query::collection(self.collection.as_str())
                .where_eq("is_active", true)
                .where_gte("geohash", range.start)
                .where_lt("geohash", range.end)
                .order_by("geohash", Direction::Ascending)
                .limit(self.per_range_limit);
            async move { self.store.query(&query).await }
        });
        let pages = try_join_all(queries).await?;

        let mut seen = HashSet::new();
        let mut nearby = Vec::new();
        for document in pages.into_iter().flatten() {
            if !seen.insert(document.id.clone()) {
                continue;
            }
            let listing: Listing = match document.decode() {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::warn!("Skipping malformed listing {}: {}", document.id, e);
                    continue;
                }
            };
            let distance_m = haversine_distance(
                center.latitude,
                center.longitude,
                listing.latitude,
                listing.longitude,
            );
            if distance_m <= radius_m {
                nearby.push(NearbyListing {
                    listing,
                    distance_m,
                });
            }
        }

        nearby.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        Ok(nearby)
    }
}
