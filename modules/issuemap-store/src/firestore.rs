use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use issuemap_common::{GeoPoint, IssueMapError, StoreConfig};

use crate::document::{Document, FieldValue};
use crate::error::{Result, StoreError};
use crate::{DocumentStore, RangeQuery, CATEGORY_FIELD, SPATIAL_KEY_FIELD};

const BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Page size for sub-collection listing.
const PAGE_SIZE: u32 = 300;

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database: String,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub issues_collection: String,
    pub reports_collection: String,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: "(default)".to_string(),
            api_key: None,
            bearer_token: None,
            issues_collection: "issues".to_string(),
            reports_collection: "reports".to_string(),
        }
    }

    pub fn from_store_config(config: &StoreConfig) -> issuemap_common::Result<Self> {
        let project_id = config.firestore_project_id.clone().ok_or_else(|| {
            IssueMapError::Config("FIRESTORE_PROJECT_ID environment variable is required".into())
        })?;
        Ok(Self {
            database: config.firestore_database.clone(),
            api_key: config.firestore_api_key.clone(),
            bearer_token: config.firestore_bearer_token.clone(),
            ..Self::new(project_id)
        })
    }
}

/// Firestore REST client for the two reads the engine performs.
pub struct FirestoreStore {
    client: reqwest::Client,
    config: FirestoreConfig,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<RawDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            BASE_URL, self.config.project_id, self.config.database
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = match &self.config.api_key {
            Some(key) => req.query(&[("key", key.as_str())]),
            None => req,
        };
        match &self.config.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let resp = self.authorize(req).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }
}

/// Structured query for one spatial-key range.
fn structured_query(collection: &str, query: &RangeQuery) -> Value {
    let mut filters = vec![
        field_filter(SPATIAL_KEY_FIELD, "GREATER_THAN_OR_EQUAL", json!({ "stringValue": query.low })),
        field_filter(SPATIAL_KEY_FIELD, "LESS_THAN_OR_EQUAL", json!({ "stringValue": query.high })),
    ];
    if let Some(categories) = &query.categories {
        let values: Vec<Value> = categories
            .iter()
            .map(|c| json!({ "stringValue": c }))
            .collect();
        filters.push(field_filter(
            CATEGORY_FIELD,
            "IN",
            json!({ "arrayValue": { "values": values } }),
        ));
    }

    json!({
        "structuredQuery": {
            "from": [{ "collectionId": collection }],
            "where": { "compositeFilter": { "op": "AND", "filters": filters } },
            "orderBy": [{ "field": { "fieldPath": SPATIAL_KEY_FIELD }, "direction": "ASCENDING" }]
        }
    })
}

fn field_filter(field: &str, op: &str, value: Value) -> Value {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": field },
            "op": op,
            "value": value
        }
    })
}

fn to_document(raw: RawDocument) -> Document {
    let id = raw.name.rsplit('/').next().unwrap_or_default().to_string();
    let fields = raw
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect();
    Document { id, fields }
}

/// Decode a Firestore typed value (`{"stringValue": ..}` etc.).
/// Malformed values decode to `Null` so one bad field never sinks a page.
fn decode_value(value: &Value) -> FieldValue {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return FieldValue::Null;
    };

    match kind.as_str() {
        "nullValue" => FieldValue::Null,
        "booleanValue" => inner.as_bool().map(FieldValue::Bool).unwrap_or(FieldValue::Null),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| inner.as_i64())
            .map(FieldValue::Integer)
            .unwrap_or(FieldValue::Null),
        "doubleValue" => inner
            .as_f64()
            .or_else(|| inner.as_str().and_then(|s| s.parse().ok()))
            .map(FieldValue::Double)
            .unwrap_or(FieldValue::Null),
        "timestampValue" => match inner.as_str() {
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| FieldValue::Timestamp(dt.with_timezone(&Utc)))
                .unwrap_or_else(|_| FieldValue::String(s.to_string())),
            None => FieldValue::Null,
        },
        "stringValue" | "bytesValue" | "referenceValue" => inner
            .as_str()
            .map(|s| FieldValue::String(s.to_string()))
            .unwrap_or(FieldValue::Null),
        "geoPointValue" => {
            let lat = inner.get("latitude").and_then(Value::as_f64).unwrap_or(0.0);
            let lng = inner.get("longitude").and_then(Value::as_f64).unwrap_or(0.0);
            FieldValue::GeoPoint(GeoPoint::new(lat, lng))
        }
        "arrayValue" => FieldValue::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|vals| vals.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => FieldValue::Map(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(|fields| {
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), decode_value(v)))
                        .collect::<BTreeMap<_, _>>()
                })
                .unwrap_or_default(),
        ),
        other => {
            debug!(kind = other, "Unknown Firestore value kind");
            FieldValue::Null
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<Document>> {
        let url = format!("{}:runQuery", self.documents_root());
        let body = structured_query(&self.config.issues_collection, query);

        let items: Vec<RunQueryItem> = self.send_json(self.client.post(&url).json(&body)).await?;
        let docs: Vec<Document> = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(to_document)
            .collect();

        debug!(
            low = query.low.as_str(),
            high = query.high.as_str(),
            count = docs.len(),
            "Firestore range query"
        );
        Ok(docs)
    }

    async fn list_reports(&self, issue_id: &str) -> Result<Vec<Document>> {
        let url = format!(
            "{}/{}/{}/{}",
            self.documents_root(),
            self.config.issues_collection,
            issue_id,
            self.config.reports_collection
        );

        let mut docs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(&url)
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }

            let page: ListDocumentsResponse = self.send_json(req).await?;
            docs.extend(page.documents.into_iter().map(to_document));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_without_categories_has_two_bounds() {
        let body = structured_query("issues", &RangeQuery::new("tdr1", "tdr4"));
        let filters = &body["structuredQuery"]["where"]["compositeFilter"]["filters"];
        assert_eq!(filters.as_array().unwrap().len(), 2);
        assert_eq!(filters[0]["fieldFilter"]["op"], "GREATER_THAN_OR_EQUAL");
        assert_eq!(filters[1]["fieldFilter"]["value"]["stringValue"], "tdr4");
        assert_eq!(
            body["structuredQuery"]["orderBy"][0]["field"]["fieldPath"],
            "geohash"
        );
    }

    #[test]
    fn query_with_categories_adds_in_filter() {
        let q = RangeQuery::new("a", "b").with_categories(Some(vec!["water".into(), "traffic".into()]));
        let body = structured_query("issues", &q);
        let filter = &body["structuredQuery"]["where"]["compositeFilter"]["filters"][2]["fieldFilter"];
        assert_eq!(filter["op"], "IN");
        assert_eq!(filter["field"]["fieldPath"], "category");
        assert_eq!(filter["value"]["arrayValue"]["values"][1]["stringValue"], "traffic");
    }

    #[test]
    fn decodes_typed_document() {
        let raw: RawDocument = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/issues/abc123",
            "fields": {
                "credibility": { "doubleValue": 0.8 },
                "reportCount": { "integerValue": "4" },
                "status": { "stringValue": "open" },
                "location": { "mapValue": { "fields": {
                    "lat": { "doubleValue": 12.97 },
                    "lng": { "doubleValue": 77.59 }
                }}},
                "addedAt": { "timestampValue": "2024-05-01T10:00:00.123Z" },
                "tags": { "arrayValue": { "values": [{ "stringValue": "x" }] } },
                "where": { "geoPointValue": { "latitude": 1.5, "longitude": 2.5 } },
                "deleted": { "nullValue": null }
            }
        }))
        .unwrap();

        let doc = to_document(raw);
        assert_eq!(doc.id, "abc123");
        assert_eq!(doc.get_f64("credibility"), Some(0.8));
        assert_eq!(doc.get("reportCount"), Some(&FieldValue::Integer(4)));
        assert_eq!(doc.get_str("status"), Some("open"));
        assert_eq!(doc.get_geo_point("location"), Some(GeoPoint::new(12.97, 77.59)));
        assert_eq!(doc.get_geo_point("where"), Some(GeoPoint::new(1.5, 2.5)));
        assert!(doc.get_timestamp("addedAt").is_some());
        assert_eq!(doc.get("deleted"), Some(&FieldValue::Null));
        assert_eq!(
            doc.get("tags"),
            Some(&FieldValue::Array(vec![FieldValue::String("x".into())]))
        );
    }

    #[test]
    fn malformed_timestamp_stays_unparseable() {
        let v = decode_value(&json!({ "timestampValue": "not a time" }));
        assert_eq!(v.as_timestamp(), None);
    }

    #[test]
    fn missing_project_id_is_a_config_error() {
        let err = FirestoreConfig::from_store_config(&StoreConfig::default()).unwrap_err();
        assert!(matches!(err, IssueMapError::Config(_)));
    }
}
