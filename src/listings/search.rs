//! Client-side filtering and ranking over a listing snapshot.
//!
//! Everything here is pure and synchronous. Every sort is stable, so listings
//! with equal keys keep their input order across re-renders.

use std::cmp::Ordering;

use chrono::{Local, NaiveDate};

use super::hints::days_until;
use super::types::{Listing, ShareKind};

/// Single categorical filter applied alongside the search text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFilter {
    /// Listings carrying exactly this tag.
    Tag(String),
    /// Listings offered this way.
    ShareKind(ShareKind),
}

impl CategoryFilter {
    pub fn matches(&self, listing: &Listing) -> bool {
        match self {
            CategoryFilter::Tag(tag) => listing.has_tag(tag),
            CategoryFilter::ShareKind(kind) => listing.share_kind == *kind,
        }
    }
}

/// Ordering applied to the visible list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortCriterion {
    /// Nearest first; listings without a parseable distance last.
    Distance,
    /// By first tag.
    Category,
    /// Cheapest first; free listings count as 0.
    Price,
    /// Expiring today, then tomorrow, then later; by exact expiry within each.
    ExpiryUrgency,
}

/// Listings matching the search text and the optional category filter.
///
/// Non-empty `search_text` matches case-insensitively against the name or any
/// tag. Both conditions apply when both are set.
pub fn filter(listings: &[Listing], search_text: &str, category: Option<&CategoryFilter>) -> Vec<Listing> {
    let needle = search_text.trim().to_lowercase();
    listings
        .iter()
        .filter(|listing| {
            needle.is_empty()
                || listing.name.to_lowercase().contains(&needle)
                || listing.tags.iter().any(|t| t.to_lowercase().contains(&needle))
        })
        .filter(|listing| category.map_or(true, |c| c.matches(listing)))
        .cloned()
        .collect()
}

/// Sorted copy of `listings`, using today's local date for expiry buckets.
pub fn sort(listings: &[Listing], criterion: SortCriterion) -> Vec<Listing> {
    sort_with_today(listings, criterion, Local::now().date_naive())
}

/// Sorted copy of `listings` with an explicit reference date.
pub fn sort_with_today(listings: &[Listing], criterion: SortCriterion, today: NaiveDate) -> Vec<Listing> {
    let mut sorted = listings.to_vec();
    match criterion {
        SortCriterion::Distance => sorted.sort_by(|a, b| distance_key(a).total_cmp(&distance_key(b))),
        SortCriterion::Category => sorted.sort_by(|a, b| first_tag(a).cmp(first_tag(b))),
        SortCriterion::Price => sorted.sort_by(|a, b| price_key(a).total_cmp(&price_key(b))),
        SortCriterion::ExpiryUrgency => sorted.sort_by(|a, b| compare_urgency(a, b, today)),
    }
    sorted
}

/// Kilometers parsed from the display distance; +inf when absent or unparseable.
pub fn distance_key(listing: &Listing) -> f64 {
    listing
        .display_distance
        .as_deref()
        .and_then(|label| label.trim().trim_end_matches("km").trim().parse::<f64>().ok())
        .filter(|km| !km.is_nan())
        .unwrap_or(f64::INFINITY)
}

/// Numeric price. Free and unparseable prices both count as 0.
pub fn price_key(listing: &Listing) -> f64 {
    listing
        .price
        .as_deref()
        .and_then(|price| price.trim().trim_start_matches('$').trim().parse::<f64>().ok())
        .filter(|value| !value.is_nan())
        .unwrap_or(0.0)
}

fn first_tag(listing: &Listing) -> &str {
    listing.tags.first().map(String::as_str).unwrap_or("")
}

fn expiry_bucket(listing: &Listing, today: NaiveDate) -> u8 {
    match days_until(listing.expiry, today) {
        0 => 0,
        1 => 1,
        _ => 2,
    }
}

/// Order two listings by expiry bucket, then by exact expiry.
pub fn compare_urgency(a: &Listing, b: &Listing, today: NaiveDate) -> Ordering {
    expiry_bucket(a, today)
        .cmp(&expiry_bucket(b, today))
        .then_with(|| a.expiry.cmp(&b.expiry))
}
