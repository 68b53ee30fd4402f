//! Geospatial indexing.
//!
//! Listings carry a geohash so radius searches can run as a handful of
//! lexicographic range queries against the document store, followed by an
//! exact great-circle check.

pub mod distance;
pub mod geohash;
pub mod index;

pub use distance::{format_distance_km, haversine_distance, Coordinate};
pub use geohash::{query_bounds, GeohashRange, GEOHASH_PRECISION};
pub use index::{GeoIndex, NearbyListing};
