//! Geohash encoding and radius query ranges.
//!
//! A radius search is turned into a small set of `[start, end)` prefix ranges
//! over stored geohash strings. The union of the ranges covers every cell that
//! intersects the circle, so a range query followed by an exact distance check
//! never misses a point inside the radius.

use super::distance::Coordinate;

/// Geohash alphabet.
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Characters stored per listing.
pub const GEOHASH_PRECISION: usize = 10;

const BITS_PER_CHAR: u32 = 5;
const MAX_BITS: u32 = GEOHASH_PRECISION as u32 * BITS_PER_CHAR;

const METERS_PER_DEGREE_LATITUDE: f64 = 110_574.0;
const EARTH_MERIDIONAL_CIRCUMFERENCE: f64 = 40_007_860.0;
const EARTH_EQ_RADIUS: f64 = 6_378_137.0;
const EARTH_E2: f64 = 0.006_694_478_197_99;
const EPSILON: f64 = 1e-12;

/// Half-open lexicographic range of geohash strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeohashRange {
    pub start: String,
    pub end: String,
}

impl GeohashRange {
    pub fn contains(&self, hash: &str) -> bool {
        hash >= self.start.as_str() && hash < self.end.as_str()
    }
}

/// Encode a coordinate as a geohash of `precision` characters.
pub fn encode(coordinate: Coordinate, precision: usize) -> String {
    let latitude = coordinate.latitude.clamp(-90.0, 90.0);
    let longitude = wrap_longitude(coordinate.longitude);

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut bits = 0usize;
    let mut bit_count = 0;
    let mut even = true;

    while hash.len() < precision {
        let (value, range) = if even {
            (longitude, &mut lon_range)
        } else {
            (latitude, &mut lat_range)
        };
        let mid = (range.0 + range.1) / 2.0;
        if value >= mid {
            bits = (bits << 1) | 1;
            range.0 = mid;
        } else {
            bits <<= 1;
            range.1 = mid;
        }

        even = !even;
        bit_count += 1;
        if bit_count == BITS_PER_CHAR {
            hash.push(BASE32[bits] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    hash
}

/// Ranges whose union covers every cell intersecting the circle.
///
/// Returns at most nine ranges, sorted and with overlapping or adjacent
/// ranges merged.
pub fn query_bounds(center: Coordinate, radius_m: f64) -> Vec<GeohashRange> {
    let radius_m = radius_m.max(0.0);
    let query_bits = bounding_box_bits(center, radius_m).max(1);
    let precision = query_bits.div_ceil(BITS_PER_CHAR) as usize;

    let mut ranges: Vec<GeohashRange> = bounding_box_coordinates(center, radius_m)
        .into_iter()
        .map(|coordinate| range_for_hash(&encode(coordinate, precision), query_bits))
        .collect();
    ranges.sort();
    ranges.dedup();

    let mut merged: Vec<GeohashRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                if range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Range of all hashes sharing the first `bits` bits of `hash`.
fn range_for_hash(hash: &str, bits: u32) -> GeohashRange {
    let precision = bits.div_ceil(BITS_PER_CHAR) as usize;
    if hash.len() < precision {
        return GeohashRange {
            start: hash.to_string(),
            end: format!("{}~", hash),
        };
    }

    let hash = &hash[..precision];
    let (base, last) = hash.split_at(precision - 1);
    let last_value = last
        .bytes()
        .next()
        .and_then(|c| BASE32.iter().position(|&b| b == c))
        .unwrap_or(0);

    let significant_bits = bits - base.len() as u32 * BITS_PER_CHAR;
    let unused_bits = BITS_PER_CHAR - significant_bits;
    let start_value = (last_value >> unused_bits) << unused_bits;
    let end_value = start_value + (1 << unused_bits);

    let start = format!("{}{}", base, BASE32[start_value] as char);
    let end = if end_value > 31 {
        format!("{}~", base)
    } else {
        format!("{}{}", base, BASE32[end_value] as char)
    };
    GeohashRange { start, end }
}

/// Number of hash bits whose cell is at least as large as the search box.
fn bounding_box_bits(center: Coordinate, size: f64) -> u32 {
    let lat_delta = size / METERS_PER_DEGREE_LATITUDE;
    let north = (center.latitude + lat_delta).min(90.0);
    let south = (center.latitude - lat_delta).max(-90.0);

    let bits_lat = latitude_bits_for_resolution(size).floor() as u32 * 2;
    let bits_north = (longitude_bits_for_resolution(size, north).floor() as u32 * 2).saturating_sub(1);
    let bits_south = (longitude_bits_for_resolution(size, south).floor() as u32 * 2).saturating_sub(1);

    bits_lat.min(bits_north).min(bits_south).min(MAX_BITS)
}

fn latitude_bits_for_resolution(resolution: f64) -> f64 {
    (EARTH_MERIDIONAL_CIRCUMFERENCE / 2.0 / resolution)
        .log2()
        .min(MAX_BITS as f64)
}

fn longitude_bits_for_resolution(resolution: f64, latitude: f64) -> f64 {
    let degrees = meters_to_longitude_degrees(resolution, latitude);
    if degrees.abs() > 0.000_001 {
        (360.0 / degrees).log2().max(1.0)
    } else {
        1.0
    }
}

fn meters_to_longitude_degrees(distance: f64, latitude: f64) -> f64 {
    let radians = latitude.to_radians();
    let numerator = radians.cos() * EARTH_EQ_RADIUS * std::f64::consts::PI / 180.0;
    let denominator = 1.0 / (1.0 - EARTH_E2 * radians.sin().powi(2)).sqrt();
    let delta_degrees = numerator * denominator;
    if delta_degrees < EPSILON {
        if distance > 0.0 {
            360.0
        } else {
            0.0
        }
    } else {
        (distance / delta_degrees).min(360.0)
    }
}

/// Center, edge midpoints and corners of the box around the circle.
fn bounding_box_coordinates(center: Coordinate, radius: f64) -> [Coordinate; 9] {
    let lat_degrees = radius / METERS_PER_DEGREE_LATITUDE;
    let north = (center.latitude + lat_degrees).min(90.0);
    let south = (center.latitude - lat_degrees).max(-90.0);
    let lon_north = meters_to_longitude_degrees(radius, north);
    let lon_south = meters_to_longitude_degrees(radius, south);
    let lon_delta = lon_north.max(lon_south);

    let west = wrap_longitude(center.longitude - lon_delta);
    let east = wrap_longitude(center.longitude + lon_delta);
    let lat = center.latitude;
    let lon = center.longitude;

    [
        Coordinate::new(lat, lon),
        Coordinate::new(lat, west),
        Coordinate::new(lat, east),
        Coordinate::new(north, lon),
        Coordinate::new(north, west),
        Coordinate::new(north, east),
        Coordinate::new(south, lon),
        Coordinate::new(south, west),
        Coordinate::new(south, east),
    ]
}

/// Wrap a longitude into `[-180, 180]`.
fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        adjusted % 360.0 - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}
