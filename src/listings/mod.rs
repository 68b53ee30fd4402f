//! Food listings.
//!
//! This module provides:
//! - Listing types and upload drafts
//! - The listing repository over the document store
//! - Client-side search and ranking
//! - Storage hints, recipe ideas and expiry labels

pub mod hints;
pub mod repository;
pub mod search;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use repository::{CreatedListing, ListingError, ListingRepository, LISTINGS_COLLECTION, USERS_COLLECTION};
pub use search::{CategoryFilter, SortCriterion};
pub use types::{Listing, ListingDraft, RecipeSuggestion, ShareKind, UploaderRef};
