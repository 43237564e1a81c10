//! Spatial-key partitioning: turn a query disk into the geohash ranges that
//! cover it.
//!
//! The bit depth is derived from the radius (and, for longitude, the latitude
//! of the disk's north and south edges) so that one geohash cell at that depth
//! is at least as large as the radius. Nine probe points around the disk each
//! map to the cell range containing them; identical and touching ranges are
//! then folded together so the store sees as few queries as possible.

use issuemap_common::{GeoPoint, IssueMapError, Result};

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const BITS_PER_CHAR: u32 = 5;
/// Longest geohash the `geohash` crate encodes.
const MAX_PRECISION: u32 = 12;
const MAX_BITS: u32 = MAX_PRECISION * BITS_PER_CHAR;

const EARTH_MERIDIONAL_CIRCUMFERENCE: f64 = 40_007_860.0;
const METERS_PER_DEGREE_LATITUDE: f64 = 110_574.0;
const EARTH_EQUATORIAL_RADIUS: f64 = 6_378_137.0;
const EARTH_E2: f64 = 0.006_694_478_197_99;
const EPSILON: f64 = 1e-12;

/// Radii below this are treated as this; a zero radius would otherwise
/// collapse the longitude resolution to a hemisphere.
const MIN_RADIUS_M: f64 = 1.0;

/// Upper bound sentinel: sorts after every geohash character.
const RANGE_END: char = '~';

/// One inclusive `[low, high]` spatial-key range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition {
    pub low: String,
    pub high: String,
}

impl Partition {
    pub fn new(low: impl Into<String>, high: impl Into<String>) -> Self {
        Self {
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.low.as_str() <= key && key <= self.high.as_str()
    }
}

/// Ranges covering a disk of `radius_m` meters around `center`, sorted by
/// lower bound, pairwise disjoint. Deterministic for a given input.
pub fn covering_ranges(center: GeoPoint, radius_m: f64) -> Result<Vec<Partition>> {
    if !center.is_valid() {
        return Err(IssueMapError::InvalidLocation {
            lat: center.lat,
            lng: center.lng,
        });
    }
    if !radius_m.is_finite() || radius_m < 0.0 {
        return Err(IssueMapError::InvalidRadius(radius_m));
    }
    let radius_m = radius_m.max(MIN_RADIUS_M);

    let bits = query_bits(center, radius_m);
    let precision = bits.div_ceil(BITS_PER_CHAR);

    let mut ranges = Vec::with_capacity(9);
    for probe in probe_points(center, radius_m) {
        let hash = encode(probe, precision)?;
        ranges.push(cell_range(&hash, bits));
    }

    Ok(coalesce(ranges))
}

/// Geohash of `point` at `precision` characters.
pub fn encode(point: GeoPoint, precision: u32) -> Result<String> {
    geohash::encode(
        geohash::Coord {
            x: point.lng,
            y: point.lat,
        },
        precision.clamp(1, MAX_PRECISION) as usize,
    )
    .map_err(|e| IssueMapError::SpatialKey(e.to_string()))
}

/// Number of geohash bits whose cells are no smaller than the radius.
fn query_bits(center: GeoPoint, radius_m: f64) -> u32 {
    let lat_delta = radius_m / METERS_PER_DEGREE_LATITUDE;
    let north = (center.lat + lat_delta).min(90.0);
    let south = (center.lat - lat_delta).max(-90.0);

    let bits_lat = latitude_bits(radius_m).floor() * 2.0;
    let bits_lng_north = longitude_bits(radius_m, north).floor() * 2.0 - 1.0;
    let bits_lng_south = longitude_bits(radius_m, south).floor() * 2.0 - 1.0;

    let bits = bits_lat
        .min(bits_lng_north)
        .min(bits_lng_south)
        .min(f64::from(MAX_BITS));
    (bits.max(1.0)) as u32
}

fn latitude_bits(resolution_m: f64) -> f64 {
    (EARTH_MERIDIONAL_CIRCUMFERENCE / 2.0 / resolution_m).log2()
}

fn longitude_bits(resolution_m: f64, latitude: f64) -> f64 {
    let degrees = meters_to_longitude_degrees(resolution_m, latitude);
    if degrees.abs() > 0.000_001 {
        (360.0 / degrees).log2().max(1.0)
    } else {
        1.0
    }
}

/// Degrees of longitude spanned by `distance_m` at `latitude` on the WGS84 ellipsoid.
fn meters_to_longitude_degrees(distance_m: f64, latitude: f64) -> f64 {
    let radians = latitude.to_radians();
    let numerator = radians.cos() * EARTH_EQUATORIAL_RADIUS * std::f64::consts::PI / 180.0;
    let denominator = 1.0 / (1.0 - EARTH_E2 * radians.sin().powi(2)).sqrt();
    let degree_length = numerator * denominator;
    if degree_length < EPSILON {
        if distance_m > 0.0 {
            360.0
        } else {
            0.0
        }
    } else {
        (distance_m / degree_length).min(360.0)
    }
}

fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        (adjusted % 360.0) - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}

/// Center, edge midpoints and corners of the disk's bounding box.
fn probe_points(center: GeoPoint, radius_m: f64) -> [GeoPoint; 9] {
    let lat_delta = radius_m / METERS_PER_DEGREE_LATITUDE;
    let north = (center.lat + lat_delta).min(90.0);
    let south = (center.lat - lat_delta).max(-90.0);
    let lng_delta = meters_to_longitude_degrees(radius_m, north)
        .max(meters_to_longitude_degrees(radius_m, south));
    let west = wrap_longitude(center.lng - lng_delta);
    let east = wrap_longitude(center.lng + lng_delta);

    [
        center,
        GeoPoint::new(center.lat, west),
        GeoPoint::new(center.lat, east),
        GeoPoint::new(north, center.lng),
        GeoPoint::new(north, west),
        GeoPoint::new(south, center.lng),
        GeoPoint::new(north, east),
        GeoPoint::new(south, west),
        GeoPoint::new(south, east),
    ]
}

/// Key range of the `bits`-deep cell that `hash` falls in.
fn cell_range(hash: &str, bits: u32) -> Partition {
    let precision = bits.div_ceil(BITS_PER_CHAR) as usize;
    if hash.len() < precision {
        return Partition::new(hash, format!("{hash}{RANGE_END}"));
    }

    let cell = &hash[..precision];
    let base = &cell[..precision - 1];
    let last = cell.as_bytes()[precision - 1];
    let last_value = BASE32.iter().position(|&c| c == last).unwrap_or(0) as u32;

    let significant_bits = bits - (base.len() as u32) * BITS_PER_CHAR;
    let unused_bits = BITS_PER_CHAR - significant_bits;
    let start = (last_value >> unused_bits) << unused_bits;
    let end = start + (1 << unused_bits);

    let low = format!("{base}{}", BASE32[start as usize] as char);
    if end > 31 {
        Partition::new(low, format!("{base}{RANGE_END}"))
    } else {
        Partition::new(low, format!("{base}{}", BASE32[end as usize] as char))
    }
}

/// Sort, drop duplicates and fold overlapping or touching ranges.
fn coalesce(mut ranges: Vec<Partition>) -> Vec<Partition> {
    ranges.sort();
    let mut merged: Vec<Partition> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.low <= last.high => {
                if range.high > last.high {
                    last.high = range.high;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANGALORE: GeoPoint = GeoPoint::new(12.9716, 77.5946);

    #[test]
    fn ranges_are_deterministic() {
        let a = covering_ranges(BANGALORE, 1_500.0).unwrap();
        let b = covering_ranges(BANGALORE, 1_500.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ranges_are_sorted_and_disjoint() {
        for radius in [10.0, 250.0, 1_500.0, 20_000.0, 400_000.0] {
            let ranges = covering_ranges(BANGALORE, radius).unwrap();
            assert!(!ranges.is_empty());
            assert!(ranges.len() <= 9);
            for r in &ranges {
                assert!(r.low < r.high, "{r:?}");
            }
            for pair in ranges.windows(2) {
                assert!(pair[0].high < pair[1].low, "{pair:?}");
            }
        }
    }

    #[test]
    fn every_probe_point_is_covered() {
        let radius = 1_500.0;
        let ranges = covering_ranges(BANGALORE, radius).unwrap();
        let precision = query_bits(BANGALORE, radius).div_ceil(BITS_PER_CHAR);
        for probe in probe_points(BANGALORE, radius) {
            let hash = encode(probe, precision).unwrap();
            assert!(
                ranges.iter().any(|r| r.contains(&hash)),
                "{hash} not covered by {ranges:?}"
            );
        }
    }

    #[test]
    fn city_viewport_uses_six_character_keys() {
        // ~1.5 km radius -> 26 bits -> 6 characters.
        assert_eq!(query_bits(BANGALORE, 1_500.0), 26);
        let ranges = covering_ranges(BANGALORE, 1_500.0).unwrap();
        for r in &ranges {
            assert_eq!(r.low.len(), 6, "{r:?}");
        }
    }

    #[test]
    fn larger_radius_means_coarser_keys() {
        let near = query_bits(BANGALORE, 500.0);
        let far = query_bits(BANGALORE, 50_000.0);
        assert!(far < near);
    }

    #[test]
    fn zero_radius_stays_narrow() {
        let ranges = covering_ranges(BANGALORE, 0.0).unwrap();
        assert!(!ranges.is_empty());
        assert!(ranges.iter().all(|r| r.low.len() == 10), "{ranges:?}");
    }

    #[test]
    fn cell_range_drops_unused_bits() {
        // 'r' is 23 = 0b10111. Two significant bits: 0b10000 ('h') .. 0b11000 ('s').
        assert_eq!(cell_range("tdr1", 12), Partition::new("tdh", "tds"));
        // Three significant bits: 0b10100 ('n') .. 0b11000 ('s').
        assert_eq!(cell_range("tdr1", 13), Partition::new("tdn", "tds"));
        // 'z' is 31; its cell's successor overflows the alphabet.
        assert_eq!(cell_range("tdz1", 12), Partition::new("tds", "td~"));
    }

    #[test]
    fn cell_range_full_character() {
        // 5 significant bits: exactly the cell and its successor.
        assert_eq!(cell_range("tdr1x", 20), Partition::new("tdr1", "tdr2"));
    }

    #[test]
    fn short_hash_gets_prefix_range() {
        assert_eq!(cell_range("tdr", 20), Partition::new("tdr", "tdr~"));
    }

    #[test]
    fn coalesce_merges_touching_and_duplicate_ranges() {
        let merged = coalesce(vec![
            Partition::new("tdr4", "tdr5"),
            Partition::new("tdr1", "tdr2"),
            Partition::new("tdr2", "tdr3"),
            Partition::new("tdr1", "tdr2"),
        ]);
        assert_eq!(
            merged,
            vec![Partition::new("tdr1", "tdr3"), Partition::new("tdr4", "tdr5")]
        );
    }

    #[test]
    fn wrap_longitude_folds_into_range() {
        assert_eq!(wrap_longitude(190.0), -170.0);
        assert_eq!(wrap_longitude(-190.0), 170.0);
        assert_eq!(wrap_longitude(45.0), 45.0);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(matches!(
            covering_ranges(GeoPoint::new(95.0, 0.0), 100.0),
            Err(IssueMapError::InvalidLocation { .. })
        ));
        assert!(matches!(
            covering_ranges(BANGALORE, -1.0),
            Err(IssueMapError::InvalidRadius(_))
        ));
        assert!(matches!(
            covering_ranges(BANGALORE, f64::NAN),
            Err(IssueMapError::InvalidRadius(_))
        ));
    }
}
