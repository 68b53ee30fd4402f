//! Core listing types.
//!
//! Defines shared food listings, their share kind, uploader snapshot and the
//! draft submitted by the upload form.

use std::str::FromStr;

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{geohash, Coordinate};

/// How a listing is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareKind {
    /// Given away at no cost
    Free,
    /// Sold below the usual price
    Discounted,
    /// Donated through a collection point
    Donation,
}

impl ShareKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareKind::Free => "free",
            ShareKind::Discounted => "discounted",
            ShareKind::Donation => "donation",
        }
    }

    /// Label shown on listing cards.
    pub fn display_name(&self) -> &'static str {
        match self {
            ShareKind::Free => "免費",
            ShareKind::Discounted => "優惠",
            ShareKind::Donation => "捐贈",
        }
    }
}

impl FromStr for ShareKind {
    type Err = String;

    /// Accepts the stored key or the display label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" | "免費" => Ok(ShareKind::Free),
            "discounted" | "優惠" => Ok(ShareKind::Discounted),
            "donation" | "捐贈" => Ok(ShareKind::Donation),
            other => Err(format!("unknown share kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for ShareKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Snapshot of the uploader taken when the listing was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploaderRef {
    pub display_name: String,
    pub rating_score: f64,
    pub share_count: u32,
}

impl UploaderRef {
    /// Rating shown for uploaders who have not been rated yet.
    pub const DEFAULT_RATING: f64 = 5.0;

    pub fn new(display_name: impl Into<String>, share_count: u32) -> Self {
        Self {
            display_name: display_name.into(),
            rating_score: Self::DEFAULT_RATING,
            share_count,
        }
    }
}

/// Suggested way to use the shared food.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeSuggestion {
    pub emoji: String,
    pub title: String,
    pub description: String,
}

impl RecipeSuggestion {
    pub fn new(emoji: &str, title: &str, description: &str) -> Self {
        Self {
            emoji: emoji.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }
}

/// A shared food item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Store-assigned id; a `pending-` id until the first write succeeds.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub category: String,
    /// Free-text amount ("2份", "1kg").
    pub quantity: String,
    #[serde(with = "ts_milliseconds")]
    pub expiry: DateTime<Utc>,
    pub share_kind: ShareKind,
    pub location_text: String,
    pub note: String,
    pub uploader_id: String,
    pub uploader: UploaderRef,
    pub storage_hint: String,
    #[serde(default)]
    pub recipes: Vec<RecipeSuggestion>,
    /// Display order is preserved; matching treats them as a set.
    #[serde(default)]
    pub tags: Vec<String>,
    /// `$`-prefixed amount; `None` exactly when the listing is free.
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub image_refs: Vec<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub geohash: String,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    /// Distance label relative to the viewer ("1.2km"). Never persisted.
    #[serde(skip)]
    pub display_distance: Option<String>,
}

impl Listing {
    /// Location of the listing.
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Move the listing, keeping the spatial hash in step with the coordinates.
    pub fn set_coordinate(&mut self, coordinate: Coordinate) {
        self.latitude = coordinate.latitude;
        self.longitude = coordinate.longitude;
        self.geohash = geohash::encode(coordinate, geohash::GEOHASH_PRECISION);
    }

    pub fn is_free(&self) -> bool {
        self.share_kind == ShareKind::Free
    }

    /// Whether the id was assigned locally and not yet confirmed by the store.
    pub fn is_pending(&self) -> bool {
        self.id.starts_with(PENDING_ID_PREFIX)
    }

    /// Whether any tag equals `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Prefix of ids assigned before the store confirms a write.
pub const PENDING_ID_PREFIX: &str = "pending-";

/// Upload form contents before validation and enrichment.
#[derive(Debug, Clone)]
pub struct ListingDraft {
    pub name: String,
    pub category: String,
    pub quantity: String,
    pub expiry: DateTime<Utc>,
    pub share_kind: ShareKind,
    /// Amount as typed, with or without a leading `$`.
    pub price: Option<String>,
    pub location_text: String,
    pub note: String,
    pub tags: Vec<String>,
    pub image_refs: Vec<String>,
    /// Device location; the configured default is used when absent.
    pub coordinate: Option<Coordinate>,
}

impl ListingDraft {
    /// Create a free draft with the required fields set.
    pub fn new(name: impl Into<String>, category: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            quantity: String::new(),
            expiry,
            share_kind: ShareKind::Free,
            price: None,
            location_text: String::new(),
            note: String::new(),
            tags: Vec::new(),
            image_refs: Vec::new(),
            coordinate: None,
        }
    }

    pub fn with_share_kind(mut self, kind: ShareKind, price: Option<&str>) -> Self {
        self.share_kind = kind;
        self.price = price.map(str::to_string);
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn at(mut self, coordinate: Coordinate) -> Self {
        self.coordinate = Some(coordinate);
        self
    }
}
