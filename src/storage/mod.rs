//! Local storage for the challenge progress cache.

pub mod challenge_cache;
pub mod database;
pub mod schema;

pub use challenge_cache::ChallengeCache;
pub use database::{Database, DatabaseError};
