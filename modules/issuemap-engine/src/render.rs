//! Pure helpers for the render surface: mode selection, filtering, heatmap
//! weights, marker jitter and category icons.

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::Rng;
use serde::Serialize;

use issuemap_common::{
    Category, CategorySet, GeoPoint, IssueMapError, Report, ReportKey, Result, StoreConfig,
};

/// Total spread of marker jitter in degrees; offsets are within half of it.
pub const JITTER_SPAN_DEG: f64 = 0.00003;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    Heatmap,
    Markers,
}

/// Markers strictly above the threshold zoom, heatmap otherwise.
pub fn render_mode(zoom: u8, threshold: u8) -> RenderMode {
    if zoom > threshold {
        RenderMode::Markers
    } else {
        RenderMode::Heatmap
    }
}

pub fn visible_reports<'a>(reports: &'a [Report], filters: &CategorySet) -> Vec<&'a Report> {
    reports
        .iter()
        .filter(|r| filters.contains(r.category))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatPoint {
    pub location: GeoPoint,
    pub weight: f64,
}

/// Heatmap points weighted by the parent issue's heat score. Empty in
/// marker mode.
pub fn heatmap_points(reports: &[&Report], mode: RenderMode) -> Vec<HeatPoint> {
    if mode == RenderMode::Markers {
        return Vec::new();
    }
    reports
        .iter()
        .map(|r| HeatPoint {
            location: r.location(),
            weight: r.parent_heat_score,
        })
        .collect()
}

/// Marker positions nudged by a small random offset so reports sharing a
/// location stay clickable.
pub fn jittered_positions<R>(reports: &[&Report], rng: &mut R) -> HashMap<ReportKey, GeoPoint>
where
    R: Rng + ?Sized,
{
    reports
        .iter()
        .map(|r| {
            let lat = r.lat + rng.random_range(-0.5f64..0.5) * JITTER_SPAN_DEG;
            let lng = r.lng + rng.random_range(-0.5f64..0.5) * JITTER_SPAN_DEG;
            (r.key(), GeoPoint::new(lat, lng))
        })
        .collect()
}

/// Memoized category marker icons as SVG data URIs. Entries are never
/// invalidated.
#[derive(Debug, Default)]
pub struct MarkerIconCache {
    icons: BTreeMap<Category, String>,
}

impl MarkerIconCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn icon(&mut self, category: Category) -> &str {
        self.icons
            .entry(category)
            .or_insert_with(|| marker_data_uri(category))
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }
}

fn marker_svg(category: Category) -> String {
    format!(
        concat!(
            r#"<svg width="38" height="38" viewBox="0 0 38 38" fill="none" xmlns="http://www.w3.org/2000/svg">"#,
            r##"<path d="M19 0C10.178 0 3 7.178 3 16.001C3 24.824 16.668 37.118 19 38C21.332 37.118 35 24.824 35 16.001C35 7.178 27.822 0 19 0Z" fill="{color}" stroke="#FFFFFF" stroke-width="2"/>"##,
            r#"<text x="19" y="21" font-size="14" text-anchor="middle" dominant-baseline="middle">{emoji}</text>"#,
            r#"</svg>"#
        ),
        color = category.color(),
        emoji = category.emoji(),
    )
}

fn marker_data_uri(category: Category) -> String {
    format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(marker_svg(category))
    )
}

/// Map provider key for the render surface. A missing key blocks map
/// rendering only; acquisition keeps working.
pub fn map_provider_key(config: &StoreConfig) -> Result<&str> {
    config
        .map_api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or(IssueMapError::MissingMapKey)
}
