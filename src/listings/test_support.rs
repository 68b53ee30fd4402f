//! Listing fixtures shared by unit tests.

use chrono::{TimeZone, Utc};

use super::types::{Listing, ShareKind, UploaderRef};
use crate::geo::Coordinate;

/// Active free listing at the given position.
pub fn listing_at(id: &str, latitude: f64, longitude: f64) -> Listing {
    let created = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap();
    let mut listing = Listing {
        id: id.to_string(),
        name: format!("listing {}", id),
        category: "蔬菜".to_string(),
        quantity: "1份".to_string(),
        expiry: Utc.with_ymd_and_hms(2026, 10, 5, 12, 0, 0).unwrap(),
        share_kind: ShareKind::Free,
        location_text: "用戶位置".to_string(),
        note: "歡迎索取！".to_string(),
        uploader_id: "uploader".to_string(),
        uploader: UploaderRef::new("小明", 3),
        storage_hint: "依照包裝指示保存".to_string(),
        recipes: Vec::new(),
        tags: vec!["蔬菜".to_string()],
        price: None,
        image_refs: Vec::new(),
        latitude: 0.0,
        longitude: 0.0,
        geohash: String::new(),
        created_at: created,
        updated_at: created,
        is_active: true,
        display_distance: None,
    };
    listing.set_coordinate(Coordinate::new(latitude, longitude));
    listing
}

/// Listing with a given name and tags at the default test position.
pub fn listing_named(id: &str, name: &str, tags: &[&str]) -> Listing {
    let mut listing = listing_at(id, 25.0330, 121.5654);
    listing.name = name.to_string();
    listing.tags = tags.iter().map(|t| t.to_string()).collect();
    listing
}
