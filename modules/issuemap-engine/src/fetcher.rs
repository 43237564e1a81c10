//! Range queries against the document store, fanned out with bounded
//! parallelism and merged by issue id.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use issuemap_common::{Category, CategorySet, Issue};
use issuemap_store::{Document, DocumentStore, RangeQuery, CATEGORY_FIELD, SPATIAL_KEY_FIELD};

use crate::partition::Partition;

/// Issues returned by one fetch, plus the ranges whose query failed.
#[derive(Debug, Default)]
pub struct FetchedIssues {
    /// One entry per issue id, in id order.
    pub issues: Vec<Issue>,
    pub failed: Vec<Partition>,
}

/// Decode an issue document. Missing or malformed fields take their
/// defaults: heat score and credibility 0, category `other`.
pub fn issue_from_document(doc: &Document) -> Issue {
    Issue {
        id: doc.id.clone(),
        location: doc.get_geo_point("location"),
        normalized_heat_score: doc.get_f64("normalizedHeatScore").unwrap_or(0.0),
        category: doc
            .get_str(CATEGORY_FIELD)
            .map(Category::parse)
            .unwrap_or(Category::Other),
        credibility: doc.get_f64("credibility").unwrap_or(0.0),
        status: doc.get_str("status").map(str::to_string),
        geohash: doc.get_str(SPATIAL_KEY_FIELD).map(str::to_string),
    }
}

/// Query every partition, at most `concurrency` at a time. A failed range
/// is logged and reported in `failed`; it never aborts the batch.
pub async fn fetch_issues<S>(
    store: &S,
    partitions: &[Partition],
    categories: &CategorySet,
    concurrency: usize,
) -> FetchedIssues
where
    S: DocumentStore + ?Sized,
{
    let category_values = categories.query_values();

    let queries: Vec<_> = partitions
        .iter()
        .cloned()
        .map(|partition| {
            let query = RangeQuery::new(partition.low.clone(), partition.high.clone())
                .with_categories(category_values.clone());
            async move {
                let result = store.query_range(&query).await;
                (partition, result)
            }
        })
        .collect();

    let results: Vec<_> = stream::iter(queries)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut by_id: BTreeMap<String, Issue> = BTreeMap::new();
    let mut failed = Vec::new();
    for (partition, result) in results {
        match result {
            Ok(docs) => {
                debug!(
                    low = partition.low.as_str(),
                    high = partition.high.as_str(),
                    count = docs.len(),
                    "Range query returned"
                );
                for doc in &docs {
                    by_id
                        .entry(doc.id.clone())
                        .or_insert_with(|| issue_from_document(doc));
                }
            }
            Err(e) => {
                warn!(
                    low = partition.low.as_str(),
                    high = partition.high.as_str(),
                    error = %e,
                    "Range query failed, skipping partition"
                );
                failed.push(partition);
            }
        }
    }

    FetchedIssues {
        issues: by_id.into_values().collect(),
        failed,
    }
}
