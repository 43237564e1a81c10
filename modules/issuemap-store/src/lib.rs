//! Query contract of the geo-indexed document store, plus the two adapters
//! the engine ships with: Firestore over REST and an in-memory store.

pub mod document;
pub mod error;
pub mod firestore;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use document::{Document, FieldValue};
pub use error::{Result, StoreError};
pub use firestore::{FirestoreConfig, FirestoreStore};
pub use memory::MemoryStore;

/// Field holding the sortable spatial key (geohash) on issue documents.
pub const SPATIAL_KEY_FIELD: &str = "geohash";

/// Field holding the issue category.
pub const CATEGORY_FIELD: &str = "category";

/// A range query over the spatial key with inclusive bounds, ordered by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub low: String,
    pub high: String,
    /// Optional `category IN (...)` predicate.
    pub categories: Option<Vec<String>>,
}

impl RangeQuery {
    pub fn new(low: impl Into<String>, high: impl Into<String>) -> Self {
        Self {
            low: low.into(),
            high: high.into(),
            categories: None,
        }
    }

    pub fn with_categories(mut self, categories: Option<Vec<String>>) -> Self {
        self.categories = categories;
        self
    }

    /// Whether a document's key and category satisfy this query.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(key) = doc.get_str(SPATIAL_KEY_FIELD) else {
            return false;
        };
        if key < self.low.as_str() || key > self.high.as_str() {
            return false;
        }
        match &self.categories {
            Some(allowed) => doc
                .get_str(CATEGORY_FIELD)
                .is_some_and(|c| allowed.iter().any(|a| a == c)),
            None => true,
        }
    }
}

/// The two reads the acquisition engine needs from the store.
///
/// Implemented by `FirestoreStore` (production) and `MemoryStore` (tests,
/// fixtures). Also implemented for `Arc<S>` so a store can be shared with
/// test assertions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Issues whose spatial key lies within the query's bounds.
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<Document>>;

    /// Every report in an issue's `reports` sub-collection.
    async fn list_reports(&self, issue_id: &str) -> Result<Vec<Document>>;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<Document>> {
        (**self).query_range(query).await
    }

    async fn list_reports(&self, issue_id: &str) -> Result<Vec<Document>> {
        (**self).list_reports(issue_id).await
    }
}
