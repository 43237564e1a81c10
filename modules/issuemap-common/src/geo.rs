use std::f64::consts::PI;

use crate::types::GeoPoint;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance unit for haversine calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Meters,
    Kilometers,
}

impl DistanceUnit {
    fn earth_radius(self) -> f64 {
        match self {
            Self::Meters => EARTH_RADIUS_METERS,
            Self::Kilometers => EARTH_RADIUS_KM,
        }
    }
}

/// Haversine distance between two points in the specified unit.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint, unit: DistanceUnit) -> f64 {
    let to_rad = |deg: f64| deg * PI / 180.0;

    let dlat = to_rad(b.lat - a.lat);
    let dlng = to_rad(b.lng - a.lng);

    let h = (dlat / 2.0).sin().powi(2)
        + to_rad(a.lat).cos() * to_rad(b.lat).cos() * (dlng / 2.0).sin().powi(2);

    // Clamp guards against rounding pushing h a hair above 1.0 for antipodes.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    unit.earth_radius() * c
}

/// Haversine distance in kilometers.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_distance(a, b, DistanceUnit::Kilometers)
}

/// Haversine distance in meters.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_distance(a, b, DistanceUnit::Meters)
}

/// Query radius for a viewport: center-to-corner distance in km scaled by
/// `multiplier` (1000 turns it into meters covering the circumscribed disk).
pub fn fetch_radius(center: GeoPoint, north_east: GeoPoint, multiplier: f64) -> f64 {
    haversine_km(center, north_east) * multiplier
}
