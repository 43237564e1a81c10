use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both coordinates are finite and within WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Geographic bounds of the visible map area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub north_east: GeoPoint,
    pub south_west: GeoPoint,
}

impl GeoBounds {
    pub fn new(north_east: GeoPoint, south_west: GeoPoint) -> Self {
        Self {
            north_east,
            south_west,
        }
    }
}

/// What the map provider reports after a pan/zoom/resize settles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: GeoPoint,
    pub bounds: GeoBounds,
    pub zoom: u8,
}

impl Viewport {
    pub fn new(center: GeoPoint, bounds: GeoBounds, zoom: u8) -> Self {
        Self {
            center,
            bounds,
            zoom,
        }
    }

    /// Viewport centered on `center` with the north-east corner at the given
    /// offset; the south-west corner mirrors it.
    pub fn around(center: GeoPoint, half_lat: f64, half_lng: f64, zoom: u8) -> Self {
        let ne = GeoPoint::new(center.lat + half_lat, center.lng + half_lng);
        let sw = GeoPoint::new(center.lat - half_lat, center.lng - half_lng);
        Self::new(center, GeoBounds::new(ne, sw), zoom)
    }

    /// Same visible span, moved so `center` is in the middle.
    pub fn recentered(&self, center: GeoPoint) -> Self {
        let dlat = center.lat - self.center.lat;
        let dlng = center.lng - self.center.lng;
        let shift = |p: GeoPoint| GeoPoint::new(p.lat + dlat, p.lng + dlng);
        Self {
            center,
            bounds: GeoBounds::new(shift(self.bounds.north_east), shift(self.bounds.south_west)),
            zoom: self.zoom,
        }
    }

    /// Same center at another zoom; every zoom step halves (or doubles) the span.
    pub fn with_zoom(&self, zoom: u8) -> Self {
        let scale = 2f64.powi(i32::from(self.zoom) - i32::from(zoom));
        let half_lat = (self.bounds.north_east.lat - self.center.lat) * scale;
        let half_lng = (self.bounds.north_east.lng - self.center.lng) * scale;
        Self::around(self.center, half_lat, half_lng, zoom)
    }
}

/// A device geolocation reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub point: GeoPoint,
    pub accuracy_m: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationFix {
    pub fn now(point: GeoPoint, accuracy_m: f64) -> Self {
        Self {
            point,
            accuracy_m,
            captured_at: Utc::now(),
        }
    }

    /// Age of the reading relative to `now`, zero if captured in the future.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.captured_at).to_std().unwrap_or_default()
    }
}

// --- Categories ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sanitation,
    RoadDamage,
    Traffic,
    Water,
    Lighting,
    Weather,
    Event,
    Safety,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Sanitation,
        Category::RoadDamage,
        Category::Traffic,
        Category::Water,
        Category::Lighting,
        Category::Weather,
        Category::Event,
        Category::Safety,
        Category::Other,
    ];

    /// Case-insensitive parse; anything unrecognized is `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "sanitation" => Self::Sanitation,
            "road_damage" => Self::RoadDamage,
            "traffic" => Self::Traffic,
            "water" => Self::Water,
            "lighting" => Self::Lighting,
            "weather" => Self::Weather,
            "event" => Self::Event,
            "safety" => Self::Safety,
            _ => Self::Other,
        }
    }

    /// Wire value stored in the document store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sanitation => "sanitation",
            Self::RoadDamage => "road_damage",
            Self::Traffic => "traffic",
            Self::Water => "water",
            Self::Lighting => "lighting",
            Self::Weather => "weather",
            Self::Event => "event",
            Self::Safety => "safety",
            Self::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sanitation => "Sanitation",
            Self::RoadDamage => "Road Damage",
            Self::Traffic => "Traffic",
            Self::Water => "Water",
            Self::Lighting => "Lighting",
            Self::Weather => "Weather",
            Self::Event => "Event",
            Self::Safety => "Safety",
            Self::Other => "Other",
        }
    }

    /// Marker fill color.
    pub fn color(&self) -> &'static str {
        match self {
            Self::Sanitation => "#8B4513",
            Self::RoadDamage => "#708090",
            Self::Traffic => "#FF4500",
            Self::Water => "#1E90FF",
            Self::Lighting => "#FFD700",
            Self::Weather => "#4682B4",
            Self::Event => "#FF69B4",
            Self::Safety => "#DC143C",
            Self::Other => "#B0B0B0",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Sanitation => "🗑️",
            Self::RoadDamage => "🚧",
            Self::Traffic => "🚦",
            Self::Water => "💧",
            Self::Lighting => "💡",
            Self::Weather => "☁️",
            Self::Event => "🎉",
            Self::Safety => "🛡️",
            Self::Other => "❓",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The active category filter. Defaults to every category selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySet(BTreeSet<Category>);

impl CategorySet {
    pub fn all() -> Self {
        Self(Category::ALL.into_iter().collect())
    }

    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn contains(&self, category: Category) -> bool {
        self.0.contains(&category)
    }

    pub fn is_all(&self) -> bool {
        self.0.len() == Category::ALL.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Flip one category on or off.
    pub fn toggle(&mut self, category: Category) {
        if !self.0.remove(&category) {
            self.0.insert(category);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.0.iter().copied()
    }

    /// Category values for a membership predicate, or `None` when the
    /// predicate would be redundant (all selected) or degenerate (none).
    pub fn query_values(&self) -> Option<Vec<String>> {
        if self.is_all() || self.is_empty() {
            return None;
        }
        Some(self.iter().map(|c| c.as_str().to_string()).collect())
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<Category> for CategorySet {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// --- Issues & Reports ---

/// Lifecycle status that admits an issue to aggregation.
pub const STATUS_OPEN: &str = "open";

/// A civic issue as stored in the geo-indexed `issues` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub location: Option<GeoPoint>,
    pub normalized_heat_score: f64,
    pub category: Category,
    pub credibility: f64,
    pub status: Option<String>,
    pub geohash: Option<String>,
}

impl Issue {
    pub fn is_open(&self) -> bool {
        self.status.as_deref() == Some(STATUS_OPEN)
    }
}

/// Composite identity of a report; report ids are only unique per issue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportKey {
    pub issue_id: String,
    pub report_id: String,
}

impl ReportKey {
    pub fn new(issue_id: impl Into<String>, report_id: impl Into<String>) -> Self {
        Self {
            issue_id: issue_id.into(),
            report_id: report_id.into(),
        }
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.issue_id, self.report_id)
    }
}

/// A normalized citizen report, ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub issue_id: String,
    pub summary: String,
    pub image_url: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub added_at: DateTime<Utc>,
    /// Owning issue's heat score at aggregation time.
    pub parent_heat_score: f64,
    pub category: Category,
}

impl Report {
    pub fn key(&self) -> ReportKey {
        ReportKey::new(self.issue_id.clone(), self.id.clone())
    }

    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}
