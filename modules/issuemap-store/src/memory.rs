//! In-memory document store. Honors the same range-query contract as
//! Firestore, records every call for assertions, and can inject failures,
//! latency and a report gate to drive the engine's failure paths in tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;

use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::{DocumentStore, RangeQuery, SPATIAL_KEY_FIELD};

#[derive(Debug, Deserialize)]
struct Fixture {
    issues: Vec<FixtureIssue>,
}

#[derive(Debug, Deserialize)]
struct FixtureIssue {
    id: String,
    fields: serde_json::Value,
    #[serde(default)]
    reports: Vec<FixtureReport>,
}

#[derive(Debug, Deserialize)]
struct FixtureReport {
    id: String,
    fields: serde_json::Value,
}

pub struct MemoryStore {
    issues: Mutex<BTreeMap<String, Document>>,
    reports: Mutex<HashMap<String, Vec<Document>>>,
    failing_ranges: Mutex<HashSet<(String, String)>>,
    failing_issues: Mutex<HashSet<String>>,
    range_calls: Mutex<Vec<RangeQuery>>,
    report_calls: Mutex<Vec<String>>,
    latency: Mutex<Option<Duration>>,
    report_gate: watch::Sender<bool>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        let (report_gate, _) = watch::channel(true);
        Self {
            issues: Mutex::new(BTreeMap::new()),
            reports: Mutex::new(HashMap::new()),
            failing_ranges: Mutex::new(HashSet::new()),
            failing_issues: Mutex::new(HashSet::new()),
            range_calls: Mutex::new(Vec::new()),
            report_calls: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
            report_gate,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Load a JSON fixture of the form
    /// `{"issues": [{"id", "fields": {..}, "reports": [{"id", "fields": {..}}]}]}`.
    pub fn from_fixture_json(json: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(json)?;
        let store = Self::new();
        for issue in fixture.issues {
            store.insert_issue(Document::from_json(issue.id.clone(), issue.fields));
            for report in issue.reports {
                store.insert_report(&issue.id, Document::from_json(report.id, report.fields));
            }
        }
        Ok(store)
    }

    pub fn load_fixture(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        Self::from_fixture_json(&json)
    }

    pub fn insert_issue(&self, doc: Document) {
        lock(&self.issues).insert(doc.id.clone(), doc);
    }

    pub fn insert_report(&self, issue_id: &str, doc: Document) {
        lock(&self.reports)
            .entry(issue_id.to_string())
            .or_default()
            .push(doc);
    }

    /// Make the range query with exactly these bounds fail.
    pub fn fail_range(&self, low: &str, high: &str) {
        lock(&self.failing_ranges).insert((low.to_string(), high.to_string()));
    }

    /// Make report reads for this issue fail until `heal_issue`.
    pub fn fail_issue(&self, issue_id: &str) {
        lock(&self.failing_issues).insert(issue_id.to_string());
    }

    pub fn heal_issue(&self, issue_id: &str) {
        lock(&self.failing_issues).remove(issue_id);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Hold report reads until `open_reports` is called.
    pub fn close_reports(&self) {
        self.report_gate.send_replace(false);
    }

    pub fn open_reports(&self) {
        self.report_gate.send_replace(true);
    }

    pub fn range_calls(&self) -> Vec<RangeQuery> {
        lock(&self.range_calls).clone()
    }

    pub fn report_calls(&self) -> Vec<String> {
        lock(&self.report_calls).clone()
    }

    /// How many times reports were read for one issue.
    pub fn report_reads_for(&self, issue_id: &str) -> usize {
        lock(&self.report_calls)
            .iter()
            .filter(|id| id.as_str() == issue_id)
            .count()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> ActiveCall<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let call = ActiveCall { store: self };
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        call
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct ActiveCall<'a> {
    store: &'a MemoryStore,
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.store.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<Document>> {
        lock(&self.range_calls).push(query.clone());
        let _call = self.enter().await;

        let failing = lock(&self.failing_ranges).contains(&(query.low.clone(), query.high.clone()));
        if failing {
            return Err(StoreError::Unavailable(format!(
                "range {}..{} failed",
                query.low, query.high
            )));
        }

        let mut docs: Vec<Document> = lock(&self.issues)
            .values()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect();
        docs.sort_by(|a, b| {
            a.get_str(SPATIAL_KEY_FIELD)
                .cmp(&b.get_str(SPATIAL_KEY_FIELD))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(docs)
    }

    async fn list_reports(&self, issue_id: &str) -> Result<Vec<Document>> {
        lock(&self.report_calls).push(issue_id.to_string());
        let _call = self.enter().await;

        let mut gate = self.report_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if lock(&self.failing_issues).contains(issue_id) {
            return Err(StoreError::Unavailable(format!(
                "reports for issue {issue_id} failed"
            )));
        }

        Ok(lock(&self.reports).get(issue_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValue;

    fn issue(id: &str, geohash: &str) -> Document {
        Document::new(id).with(SPATIAL_KEY_FIELD, FieldValue::String(geohash.into()))
    }

    #[tokio::test]
    async fn range_query_is_sorted_by_spatial_key() {
        let store = MemoryStore::new();
        store.insert_issue(issue("b", "tdr3"));
        store.insert_issue(issue("a", "tdr5"));
        store.insert_issue(issue("c", "tdr1"));
        store.insert_issue(issue("far", "u4pr"));

        let docs = store.query_range(&RangeQuery::new("tdr0", "tdr~")).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(store.range_calls().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let store = MemoryStore::new();
        store.fail_range("a", "b");
        store.fail_issue("x");

        assert!(store.query_range(&RangeQuery::new("a", "b")).await.is_err());
        assert!(store.query_range(&RangeQuery::new("a", "c")).await.is_ok());
        assert!(store.list_reports("x").await.is_err());

        store.heal_issue("x");
        assert!(store.list_reports("x").await.unwrap().is_empty());
        assert_eq!(store.report_reads_for("x"), 2);
    }

    #[tokio::test]
    async fn fixture_loads_issues_and_reports() {
        let store = MemoryStore::from_fixture_json(
            r#"{"issues": [
                {"id": "A", "fields": {"geohash": "tdr1", "status": "open"},
                 "reports": [{"id": "r1", "fields": {"summary": "Overflowing bin"}}]}
            ]}"#,
        )
        .unwrap();

        let issues = store.query_range(&RangeQuery::new("tdr", "tdr~")).await.unwrap();
        assert_eq!(issues.len(), 1);
        let reports = store.list_reports("A").await.unwrap();
        assert_eq!(reports[0].get_str("summary"), Some("Overflowing bin"));
    }

    #[test]
    fn malformed_fixture_is_a_parse_error() {
        assert!(matches!(
            MemoryStore::from_fixture_json("{\"issues\": 3}"),
            Err(StoreError::Parse(_))
        ));
    }
}
