use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use issuemap_common::GeoPoint;

/// A typed field value as held by the document store.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    GeoPoint(GeoPoint),
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value; integers widen to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Double(d) => Some(*d),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Timestamp value. Accepts native timestamps, RFC 3339 strings and
    /// `{seconds, nanoseconds}` maps (as exported by client SDKs).
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            FieldValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            FieldValue::Map(m) => {
                let seconds = m.get("seconds").or_else(|| m.get("_seconds"))?;
                let seconds = match seconds {
                    FieldValue::Integer(i) => *i,
                    _ => return None,
                };
                let nanos = match m.get("nanoseconds").or_else(|| m.get("_nanoseconds")) {
                    Some(FieldValue::Integer(n)) => u32::try_from(*n).ok()?,
                    None => 0,
                    Some(_) => return None,
                };
                Utc.timestamp_opt(seconds, nanos).single()
            }
            _ => None,
        }
    }

    /// Geo point value. Accepts native geo points and `{lat, lng}` /
    /// `{latitude, longitude}` maps.
    pub fn as_geo_point(&self) -> Option<GeoPoint> {
        match self {
            FieldValue::GeoPoint(p) => Some(*p),
            FieldValue::Map(m) => {
                let lat = m.get("lat").or_else(|| m.get("latitude"))?.as_f64()?;
                let lng = m.get("lng").or_else(|| m.get("longitude"))?.as_f64()?;
                Some(GeoPoint::new(lat, lng))
            }
            _ => None,
        }
    }
}

/// Plain JSON maps onto store values without timestamp or geo point types;
/// those are recovered by the `as_*` accessors.
impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => FieldValue::String(s),
            serde_json::Value::Array(items) => {
                FieldValue::Array(items.into_iter().map(FieldValue::from).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// One `{id, fields}` record returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Document from a JSON object of fields; non-objects yield no fields.
    pub fn from_json(id: impl Into<String>, fields: serde_json::Value) -> Self {
        let fields = match FieldValue::from(fields) {
            FieldValue::Map(m) => m,
            _ => BTreeMap::new(),
        };
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FieldValue::as_f64)
    }

    pub fn get_timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(FieldValue::as_timestamp)
    }

    pub fn get_geo_point(&self, key: &str) -> Option<GeoPoint> {
        self.get(key).and_then(FieldValue::as_geo_point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_keep_integer_precision() {
        assert_eq!(FieldValue::from(json!(3)), FieldValue::Integer(3));
        assert_eq!(FieldValue::from(json!(0.6)), FieldValue::Double(0.6));
        assert_eq!(FieldValue::Integer(2).as_f64(), Some(2.0));
    }

    #[test]
    fn timestamps_parse_from_strings_and_second_maps() {
        let s = FieldValue::String("2024-05-01T10:00:00Z".into());
        assert_eq!(
            s.as_timestamp().unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );

        let m = FieldValue::from(json!({"seconds": 1714557600, "nanoseconds": 0}));
        assert_eq!(m.as_timestamp(), s.as_timestamp());
    }

    #[test]
    fn unparseable_timestamps_are_none() {
        assert_eq!(FieldValue::String("yesterday".into()).as_timestamp(), None);
        assert_eq!(FieldValue::Integer(1714557600).as_timestamp(), None);
        assert_eq!(FieldValue::Null.as_timestamp(), None);
        assert_eq!(FieldValue::from(json!({"seconds": "x"})).as_timestamp(), None);
    }

    #[test]
    fn geo_points_from_maps() {
        let doc = Document::from_json("a", json!({"location": {"lat": 12.9, "lng": 77.5}}));
        assert_eq!(doc.get_geo_point("location"), Some(GeoPoint::new(12.9, 77.5)));

        let doc = Document::from_json(
            "b",
            json!({"location": {"latitude": 1.0, "longitude": 2}}),
        );
        assert_eq!(doc.get_geo_point("location"), Some(GeoPoint::new(1.0, 2.0)));
    }
}
