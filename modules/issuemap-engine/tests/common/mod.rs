//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use issuemap_common::{fetch_radius, EngineConfig, GeoPoint, Viewport};
use issuemap_engine::partition::{covering_ranges, encode, Partition};
use issuemap_store::{Document, DocumentStore, RangeQuery};

pub const CENTER: GeoPoint = GeoPoint::new(12.9716, 77.5946);

/// A ~1.5 km radius viewport around `center`; partitions into several ranges.
pub fn viewport_at(center: GeoPoint, zoom: u8) -> Viewport {
    Viewport::around(center, 0.01, 0.01, zoom)
}

pub fn viewport(zoom: u8) -> Viewport {
    viewport_at(CENTER, zoom)
}

/// The ranges a cycle for `viewport` will request.
pub fn partitions_for(viewport: &Viewport) -> Vec<Partition> {
    let radius = fetch_radius(
        viewport.center,
        viewport.bounds.north_east,
        EngineConfig::default().fetch_radius_multiplier,
    );
    covering_ranges(viewport.center, radius).unwrap()
}

pub fn issue_doc(id: &str, at: GeoPoint, credibility: f64, status: &str) -> Document {
    Document::from_json(
        id,
        json!({
            "geohash": encode(at, 9).unwrap(),
            "location": {"lat": at.lat, "lng": at.lng},
            "category": "water",
            "credibility": credibility,
            "normalizedHeatScore": 0.5,
            "status": status
        }),
    )
}

pub fn report_doc(id: &str) -> Document {
    Document::from_json(
        id,
        json!({"summary": format!("report {id}"), "addedAt": "2024-05-01T10:00:00Z"}),
    )
}

/// Store that answers each exact range with a scripted result, so one issue
/// can show up under several partitions.
#[derive(Default)]
pub struct ScriptedStore {
    pub ranges: HashMap<(String, String), Vec<Document>>,
    pub reports: HashMap<String, Vec<Document>>,
    pub report_reads: Mutex<Vec<String>>,
}

impl ScriptedStore {
    pub fn on_range(&mut self, partition: &Partition, docs: Vec<Document>) {
        self.ranges
            .insert((partition.low.clone(), partition.high.clone()), docs);
    }

    pub fn reads(&self) -> Vec<String> {
        self.report_reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    async fn query_range(&self, query: &RangeQuery) -> issuemap_store::Result<Vec<Document>> {
        Ok(self
            .ranges
            .get(&(query.low.clone(), query.high.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_reports(&self, issue_id: &str) -> issuemap_store::Result<Vec<Document>> {
        self.report_reads.lock().unwrap().push(issue_id.to_string());
        Ok(self.reports.get(issue_id).cloned().unwrap_or_default())
    }
}
