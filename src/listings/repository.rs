//! Listing repository.
//!
//! Owns the set of listings currently on screen. Reads replace that set as a
//! whole and failed reads leave it untouched. Writes go to the document store
//! first; uploader stats are only touched after the listing itself is stored.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::hints::{recipe_suggestions, storage_hint};
use super::types::{Listing, ListingDraft, ShareKind, UploaderRef, PENDING_ID_PREFIX};
use crate::config::{DiscoverySettings, RewardSettings};
use crate::geo::{format_distance_km, geohash, Coordinate, GeoIndex};
use crate::store::{
    to_fields, Direction, Document, DocumentStore, FieldUpdate, Query, StoreError, Subscription,
};

/// Collection holding listings.
pub const LISTINGS_COLLECTION: &str = "food_items";
/// Collection holding user profiles.
pub const USERS_COLLECTION: &str = "users";

const DEFAULT_QUANTITY: &str = "1份";
const DEFAULT_LOCATION_TEXT: &str = "用戶位置";
const DEFAULT_NOTE: &str = "歡迎索取！";

/// Listing errors.
#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    #[error("Invalid listing: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ListingError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ListingError::Store(e) if e.is_retryable())
    }
}

/// Outcome of a successful create.
#[derive(Debug, Clone)]
pub struct CreatedListing {
    /// The stored listing under its durable id.
    pub listing: Listing,
    /// Whether the uploader's share count, points and upload history were updated.
    /// The listing is valid either way.
    pub stats_recorded: bool,
}

#[derive(Default)]
struct VisibleSet {
    listings: Vec<Listing>,
    viewer: Option<Coordinate>,
}

/// Listing repository over a [`DocumentStore`].
pub struct ListingRepository<S: DocumentStore> {
    store: Arc<S>,
    geo: GeoIndex<S>,
    discovery: DiscoverySettings,
    rewards: RewardSettings,
    visible: Arc<Mutex<VisibleSet>>,
    live: Mutex<Option<Subscription>>,
}

impl<S: DocumentStore> ListingRepository<S> {
    pub fn new(store: Arc<S>, discovery: DiscoverySettings, rewards: RewardSettings) -> Self {
        let geo = GeoIndex::new(Arc::clone(&store), LISTINGS_COLLECTION, discovery.query_limit);
        Self {
            store,
            geo,
            discovery,
            rewards,
            visible: Arc::new(Mutex::new(VisibleSet::default())),
            live: Mutex::new(None),
        }
    }

    /// Validate a draft, store it and credit the uploader.
    ///
    /// The listing is shown under a `pending-` id until the store assigns the
    /// durable one. If the store write fails the pending entry is withdrawn and
    /// no stats are touched.
    pub async fn create(
        &self,
        draft: ListingDraft,
        uploader_id: &str,
        uploader: UploaderRef,
    ) -> Result<CreatedListing, ListingError> {
        let pending_id = format!("{}{}", PENDING_ID_PREFIX, Uuid::new_v4().simple());
        let listing = build_listing(draft, &pending_id, uploader_id, uploader, &self.discovery, Utc::now())?;
        let fields = to_fields(&listing)?;

        self.with_visible(|visible| {
            let mut shown = listing.clone();
            annotate(std::slice::from_mut(&mut shown), visible.viewer);
            visible.listings.insert(0, shown);
        });

        let id = match self.store.add(LISTINGS_COLLECTION, fields).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Failed to create listing '{}': {}", listing.name, e);
                self.with_visible(|visible| visible.listings.retain(|l| l.id != pending_id));
                return Err(e.into());
            }
        };
        tracing::info!("Created listing {} ('{}') for {}", id, listing.name, uploader_id);

        // A realtime push may already have delivered the stored copy.
        self.with_visible(|visible| {
            let stored_shown = visible.listings.iter().any(|l| l.id == id);
            if stored_shown {
                visible.listings.retain(|l| l.id != pending_id);
            } else if let Some(shown) = visible.listings.iter_mut().find(|l| l.id == pending_id) {
                shown.id = id.clone();
            }
        });

        let stats = vec![
            ("share_count".to_string(), FieldUpdate::Increment(1)),
            ("points".to_string(), FieldUpdate::Increment(self.rewards.upload_points)),
            (
                "uploads".to_string(),
                FieldUpdate::ArrayUnion(vec![Value::String(id.clone())]),
            ),
            ("updated_at".to_string(), FieldUpdate::set(Utc::now().timestamp_millis())),
        ];
        let stats_recorded = match self.store.update(USERS_COLLECTION, uploader_id, stats).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Listing {} stored but uploader stats not updated: {}", id, e);
                false
            }
        };

        Ok(CreatedListing {
            listing: Listing { id, ..listing },
            stats_recorded,
        })
    }

    /// Active listings, most recent first.
    pub async fn list_all(&self, limit: usize) -> Result<Vec<Listing>, ListingError> {
        let query = active_listings()
            .order_by("created_at", Direction::Descending)
            .limit(limit);
        self.load(query).await
    }

    /// Active listings offered a given way, most recent first.
    pub async fn list_by_share_kind(&self, kind: ShareKind, limit: usize) -> Result<Vec<Listing>, ListingError> {
        let query = active_listings()
            .where_eq("share_kind", kind.as_str())
            .order_by("created_at", Direction::Descending)
            .limit(limit);
        self.load(query).await
    }

    /// Active listings from one uploader, most recent first.
    pub async fn list_by_uploader(&self, uploader_id: &str, limit: usize) -> Result<Vec<Listing>, ListingError> {
        let query = active_listings()
            .where_eq("uploader_id", uploader_id)
            .order_by("created_at", Direction::Descending)
            .limit(limit);
        self.load(query).await
    }

    /// Active listings within `radius_km` of `center`, nearest first.
    ///
    /// Display distances are measured from the viewer's last known position,
    /// or from `center` when no position has been reported.
    pub async fn list_near(&self, center: Coordinate, radius_km: f64) -> Result<Vec<Listing>, ListingError> {
        let nearby = self.geo.query_near(center, radius_km).await?;
        let listings = self.with_visible(|visible| {
            let origin = visible.viewer.unwrap_or(center);
            let mut listings: Vec<Listing> = nearby.into_iter().map(|n| n.listing).collect();
            annotate(&mut listings, Some(origin));
            visible.listings = listings.clone();
            listings
        });
        tracing::debug!("{} listings within {}km", listings.len(), radius_km);
        Ok(listings)
    }

    /// Remember the viewer's position and relabel the visible listings.
    pub fn set_viewer_location(&self, viewer: Option<Coordinate>) {
        self.with_visible(|visible| {
            visible.viewer = viewer;
            annotate(&mut visible.listings, viewer);
        });
    }

    /// Open the live feed of the most recent active listings.
    ///
    /// Every push replaces the visible set and hands the whole window to
    /// `on_update`. An existing feed is closed first.
    pub fn subscribe<F>(&self, on_update: F) -> Result<(), ListingError>
    where
        F: Fn(Vec<Listing>) + Send + Sync + 'static,
    {
        self.unsubscribe();

        let query = active_listings()
            .order_by("created_at", Direction::Descending)
            .limit(self.discovery.live_window);
        let visible = Arc::clone(&self.visible);

        let subscription = self.store.subscribe_query(
            query,
            Arc::new(move |result: Result<Vec<Document>, StoreError>| match result {
                Ok(documents) => {
                    let mut listings = decode_listings(&documents);
                    {
                        let mut visible = visible.lock().unwrap_or_else(PoisonError::into_inner);
                        annotate(&mut listings, visible.viewer);
                        visible.listings = listings.clone();
                    }
                    on_update(listings);
                }
                Err(e) => tracing::warn!("Live listing feed error: {}", e),
            }),
        )?;

        tracing::info!("Subscribed to live listings (window {})", self.discovery.live_window);
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);
        Ok(())
    }

    /// Close the live feed, if any.
    pub fn unsubscribe(&self) {
        if let Some(mut subscription) = self.live.lock().unwrap_or_else(PoisonError::into_inner).take() {
            subscription.close();
            tracing::info!("Closed live listing feed");
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Hide a listing from discovery without removing the document.
    pub async fn soft_delete(&self, id: &str) -> Result<(), ListingError> {
        self.store
            .update(
                LISTINGS_COLLECTION,
                id,
                vec![
                    ("is_active".to_string(), FieldUpdate::set(false)),
                    ("updated_at".to_string(), FieldUpdate::set(Utc::now().timestamp_millis())),
                ],
            )
            .await?;
        self.with_visible(|visible| visible.listings.retain(|l| l.id != id));
        tracing::info!("Soft-deleted listing {}", id);
        Ok(())
    }

    /// The listings currently visible.
    pub fn snapshot(&self) -> Vec<Listing> {
        self.with_visible(|visible| visible.listings.clone())
    }

    async fn load(&self, query: Query) -> Result<Vec<Listing>, ListingError> {
        let documents = match self.store.query(&query).await {
            Ok(documents) => documents,
            Err(StoreError::MissingIndex(detail)) => {
                tracing::debug!("No composite index ({}), sorting on the client", detail);
                self.load_unordered(&query).await?
            }
            Err(e) => {
                tracing::warn!("Listing query on {} failed: {}", query.collection, e);
                return Err(e.into());
            }
        };

        let listings = self.with_visible(|visible| {
            let mut listings = decode_listings(&documents);
            annotate(&mut listings, visible.viewer);
            visible.listings = listings.clone();
            listings
        });
        Ok(listings)
    }

    /// Run `query` without server ordering, then order and cap it locally.
    /// The cap has to wait until after sorting, so the store query is unbounded.
    async fn load_unordered(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let unordered = Query {
            limit: None,
            ..query.without_order()
        };
        let mut documents = self.store.query(&unordered).await?;
        documents.sort_by(|a, b| created_at_millis(b).cmp(&created_at_millis(a)));
        if let Some(limit) = query.limit {
            documents.truncate(limit);
        }
        Ok(documents)
    }

    fn with_visible<T>(&self, f: impl FnOnce(&mut VisibleSet) -> T) -> T {
        let mut visible = self.visible.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut visible)
    }
}

impl<S: DocumentStore> Drop for ListingRepository<S> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn active_listings() -> Query {
    Query::collection(LISTINGS_COLLECTION).where_eq("is_active", true)
}

fn created_at_millis(document: &Document) -> i64 {
    document.get("created_at").and_then(Value::as_i64).unwrap_or(i64::MIN)
}

/// Decode listing documents, skipping any that do not parse.
fn decode_listings(documents: &[Document]) -> Vec<Listing> {
    documents
        .iter()
        .filter_map(|document| match document.decode::<Listing>() {
            Ok(listing) => Some(listing),
            Err(e) => {
                tracing::warn!("Skipping malformed listing {}: {}", document.id, e);
                None
            }
        })
        .collect()
}

/// Set display distances relative to `viewer`, or clear them without one.
fn annotate(listings: &mut [Listing], viewer: Option<Coordinate>) {
    for listing in listings {
        listing.display_distance =
            viewer.map(|origin| format_distance_km(origin.distance_to(&listing.coordinate())));
    }
}

/// Validate a draft and turn it into a complete active listing.
pub fn build_listing(
    draft: ListingDraft,
    id: &str,
    uploader_id: &str,
    uploader: UploaderRef,
    discovery: &DiscoverySettings,
    now: DateTime<Utc>,
) -> Result<Listing, ListingError> {
    let name = draft.name.trim().to_string();
    let category = draft.category.trim().to_string();
    if name.is_empty() {
        return Err(ListingError::Validation("name is required".to_string()));
    }
    if category.is_empty() {
        return Err(ListingError::Validation("category is required".to_string()));
    }
    if uploader_id.trim().is_empty() {
        return Err(ListingError::Validation("uploader is required".to_string()));
    }

    let price = match draft.share_kind {
        ShareKind::Free => None,
        kind => Some(normalize_price(draft.price.as_deref()).ok_or_else(|| {
            ListingError::Validation(format!("a {} listing needs a price", kind.as_str()))
        })?),
    };

    let coordinate = draft.coordinate.unwrap_or_else(|| discovery.default_location());
    if !coordinate.is_valid() {
        return Err(ListingError::Validation(format!(
            "invalid location ({}, {})",
            coordinate.latitude, coordinate.longitude
        )));
    }

    let tags = if draft.tags.iter().all(|t| t.trim().is_empty()) {
        vec![category.clone()]
    } else {
        draft
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    };

    let today = Local::now().date_naive();
    Ok(Listing {
        id: id.to_string(),
        storage_hint: storage_hint(&category, draft.expiry, today),
        recipes: recipe_suggestions(&category),
        name,
        quantity: or_default(draft.quantity, DEFAULT_QUANTITY),
        expiry: draft.expiry,
        share_kind: draft.share_kind,
        location_text: or_default(draft.location_text, DEFAULT_LOCATION_TEXT),
        note: or_default(draft.note, DEFAULT_NOTE),
        uploader_id: uploader_id.to_string(),
        uploader,
        category,
        tags,
        price,
        image_refs: draft.image_refs,
        latitude: coordinate.latitude,
        longitude: coordinate.longitude,
        geohash: geohash::encode(coordinate, geohash::GEOHASH_PRECISION),
        created_at: now,
        updated_at: now,
        is_active: true,
        display_distance: None,
    })
}

/// `$`-prefixed price, or `None` when nothing was entered.
fn normalize_price(input: Option<&str>) -> Option<String> {
    let amount = input?.trim().trim_start_matches('$').trim();
    if amount.is_empty() {
        None
    } else {
        Some(format!("${}", amount))
    }
}

fn or_default(value: String, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}
