//! Per-issue report aggregation.

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use issuemap_common::{Issue, Report};
use issuemap_store::{Document, DocumentStore};

/// Reports gathered for a batch of admitted issues.
#[derive(Debug, Default)]
pub struct Aggregation {
    /// Normalized reports, grouped by issue in issue-id order.
    pub reports: Vec<Report>,
    /// Issues whose report read failed.
    pub failed: Vec<String>,
    /// Raw reports dropped during normalization.
    pub dropped: usize,
}

/// Build a renderable report from a raw report document, tagged with the
/// owning issue's heat score and category.
///
/// Returns `None` when `addedAt` is missing or unparseable, or when neither
/// the report nor the issue carries a location.
pub fn normalize_report(issue: &Issue, doc: &Document) -> Option<Report> {
    let Some(added_at) = doc.get_timestamp("addedAt") else {
        debug!(issue_id = issue.id.as_str(), report_id = doc.id.as_str(), "Dropping report without addedAt");
        return None;
    };

    let (lat, lng) = match (doc.get_f64("lat"), doc.get_f64("lng")) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => match issue.location {
            Some(loc) => (loc.lat, loc.lng),
            None => {
                debug!(issue_id = issue.id.as_str(), report_id = doc.id.as_str(), "Dropping report without location");
                return None;
            }
        },
    };

    Some(Report {
        id: doc.id.clone(),
        issue_id: issue.id.clone(),
        summary: doc.get_str("summary").unwrap_or_default().to_string(),
        image_url: doc.get_str("imageUrl").map(str::to_string),
        lat,
        lng,
        added_at,
        parent_heat_score: issue.normalized_heat_score,
        category: issue.category,
    })
}

/// Read and normalize the reports of every issue, at most `concurrency`
/// issues at a time. A failed read contributes nothing and is listed in
/// `failed` so the caller can un-mark the issue.
pub async fn aggregate_reports<S>(store: &S, issues: &[Issue], concurrency: usize) -> Aggregation
where
    S: DocumentStore + ?Sized,
{
    let reads: Vec<_> = issues
        .iter()
        .cloned()
        .map(|issue| async move {
            let result = store.list_reports(&issue.id).await;
            (issue, result)
        })
        .collect();

    let mut results: Vec<_> = stream::iter(reads)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    results.sort_by(|a, b| a.0.id.cmp(&b.0.id));

    let mut aggregation = Aggregation::default();
    for (issue, result) in results {
        match result {
            Ok(docs) => {
                let before = aggregation.reports.len();
                aggregation
                    .reports
                    .extend(docs.iter().filter_map(|doc| normalize_report(&issue, doc)));
                aggregation.dropped += docs.len() - (aggregation.reports.len() - before);
            }
            Err(e) => {
                warn!(issue_id = issue.id.as_str(), error = %e, "Failed to read reports");
                aggregation.failed.push(issue.id.clone());
            }
        }
    }
    aggregation
}

#[cfg(test)]
mod tests {
    use super::*;
    use issuemap_common::{Category, GeoPoint};
    use issuemap_store::MemoryStore;
    use serde_json::json;

    fn issue(id: &str) -> Issue {
        Issue {
            id: id.to_string(),
            location: Some(GeoPoint::new(12.97, 77.59)),
            normalized_heat_score: 0.8,
            category: Category::Water,
            credibility: 0.9,
            status: Some("open".into()),
            geohash: Some("tdr1v".into()),
        }
    }

    #[test]
    fn report_inherits_issue_score_and_category() {
        let doc = Document::from_json(
            "r1",
            json!({"summary": "Burst pipe", "lat": 12.98, "lng": 77.6, "addedAt": "2024-05-01T10:00:00Z",
                   "imageUrl": "https://img/1.jpg", "category": "traffic"}),
        );
        let report = normalize_report(&issue("A"), &doc).unwrap();
        assert_eq!(report.issue_id, "A");
        assert_eq!(report.parent_heat_score, 0.8);
        assert_eq!(report.category, Category::Water);
        assert_eq!(report.location(), GeoPoint::new(12.98, 77.6));
        assert_eq!(report.image_url.as_deref(), Some("https://img/1.jpg"));
    }

    #[test]
    fn report_without_timestamp_is_dropped() {
        let missing = Document::from_json("r1", json!({"lat": 1.0, "lng": 2.0}));
        let garbage = Document::from_json("r2", json!({"lat": 1.0, "lng": 2.0, "addedAt": "last tuesday"}));
        assert!(normalize_report(&issue("A"), &missing).is_none());
        assert!(normalize_report(&issue("A"), &garbage).is_none());
    }

    #[test]
    fn report_location_falls_back_to_issue() {
        let doc = Document::from_json("r1", json!({"addedAt": "2024-05-01T10:00:00Z"}));
        let report = normalize_report(&issue("A"), &doc).unwrap();
        assert_eq!(report.location(), GeoPoint::new(12.97, 77.59));

        let mut nowhere = issue("B");
        nowhere.location = None;
        assert!(normalize_report(&nowhere, &doc).is_none());
    }

    #[tokio::test]
    async fn failed_issue_is_reported_and_others_survive() {
        let store = MemoryStore::new();
        store.insert_report("A", Document::from_json("r1", json!({"addedAt": "2024-05-01T10:00:00Z"})));
        store.insert_report("A", Document::from_json("r2", json!({"summary": "no time"})));
        store.insert_report("B", Document::from_json("r1", json!({"addedAt": "2024-05-02T10:00:00Z"})));
        store.fail_issue("B");

        let agg = aggregate_reports(&store, &[issue("B"), issue("A")], 2).await;
        assert_eq!(agg.reports.len(), 1);
        assert_eq!(agg.reports[0].key().to_string(), "A-r1");
        assert_eq!(agg.failed, vec!["B".to_string()]);
        assert_eq!(agg.dropped, 1);
    }
}
