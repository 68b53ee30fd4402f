//! FoodLoop - Community Food Sharing Core
//!
//! Listing discovery, ranking and challenge rewards for the FoodLoop client.
//! Provides geohash radius search over a document store, the listing
//! repository with client-side search and sorting, and the challenge and
//! badge engine that rewards sharing.

pub mod config;
pub mod geo;
pub mod listings;
pub mod session;
pub mod social;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use geo::{Coordinate, GeoIndex};
pub use listings::{Listing, ListingDraft, ListingRepository, ShareKind};
pub use session::{Session, SessionError};
pub use social::{ChallengeEngine, ChallengeType, Identity, ProfileManager, UserProfile};
pub use store::{DocumentStore, MemoryStore};
