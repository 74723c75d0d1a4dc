//! Vector record and query types shared by all store backends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::GrantId;

/// Scope of a persisted vector record. Every record carries exactly one of
/// these in `metadata.type`; message-scoped queries filter `type=message` by
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Message,
    Thread,
    ThreadDay,
    ThreadWeek,
    ThreadMonth,
}

impl RecordType {
    pub const ALL: [RecordType; 5] = [
        RecordType::Message,
        RecordType::Thread,
        RecordType::ThreadDay,
        RecordType::ThreadWeek,
        RecordType::ThreadMonth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Message => "message",
            RecordType::Thread => "thread",
            RecordType::ThreadDay => "thread_day",
            RecordType::ThreadWeek => "thread_week",
            RecordType::ThreadMonth => "thread_month",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sparse vector in coordinate form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product against another sparse vector (indices need not align).
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut score = 0.0;
        let mut j = 0usize;
        for (i, &idx) in self.indices.iter().enumerate() {
            while j < other.indices.len() && other.indices[j] < idx {
                j += 1;
            }
            if j < other.indices.len() && other.indices[j] == idx {
                score += self.values[i] * other.values[j];
            }
        }
        score
    }
}

/// A record as stored in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
    #[serde(
        default,
        rename = "sparseValues",
        skip_serializing_if = "Option::is_none"
    )]
    pub sparse_values: Option<SparseVector>,
    #[serde(default)]
    pub metadata: Value,
}

/// Typed builder for the metadata schema every record carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub grant_id: String,
    pub email_id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub from_domain: String,
    #[serde(default)]
    pub to: Vec<String>,
    /// Epoch seconds; authoritative for time filtering.
    pub date: i64,
    /// ISO-8601 timestamp of the same instant.
    pub date_created: String,
    pub snippet: String,
    pub has_attachments: bool,
    pub unread: bool,
    /// Temporal key for rollups: `YYYY-MM-DD`, `YYYY-Www`, or `YYYY-MM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

impl RecordMetadata {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Dense query request.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub namespace: GrantId,
    pub filter: Option<Value>,
    pub include_metadata: bool,
}

/// Hybrid (dense + sparse) query request.
#[derive(Debug, Clone)]
pub struct HybridQueryRequest {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub top_k: usize,
    pub namespace: GrantId,
    pub filter: Option<Value>,
}

/// Which result list a match came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Dense,
    Sparse,
    Fused,
}

/// A single query match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub source: MatchSource,
    #[serde(default)]
    pub metadata: Value,
}

/// Index statistics. `exact` is false when the backend cannot answer a
/// filtered count precisely (the count endpoint then falls back to sampling).
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub total: u64,
    pub exact: bool,
}

/// Metadata filter helpers and evaluation.
///
/// The filter language supports bare equality plus `$eq`/`$gte`/`$lte`/`$in`
/// over metadata scalars, combined implicitly by AND at the top level.
pub mod filter {
    use serde_json::{json, Map, Value};

    pub fn eq(value: impl Into<Value>) -> Value {
        json!({ "$eq": value.into() })
    }

    pub fn gte(value: impl Into<Value>) -> Value {
        json!({ "$gte": value.into() })
    }

    pub fn lte(value: impl Into<Value>) -> Value {
        json!({ "$lte": value.into() })
    }

    pub fn r#in(values: Vec<Value>) -> Value {
        json!({ "$in": values })
    }

    /// Merge `field: clause` into an existing filter object, replacing any
    /// previous clause for that field.
    pub fn with(filter: Option<Value>, field: &str, clause: Value) -> Value {
        let mut map = match filter {
            Some(Value::Object(m)) => m,
            _ => Map::new(),
        };
        map.insert(field.to_string(), clause);
        Value::Object(map)
    }

    fn as_f64(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    fn clause_matches(actual: Option<&Value>, clause: &Value) -> bool {
        match clause {
            Value::Object(ops) => ops.iter().all(|(op, expected)| {
                let Some(actual) = actual else { return false };
                match op.as_str() {
                    "$eq" => actual == expected,
                    "$gte" => matches!(
                        (as_f64(actual), as_f64(expected)),
                        (Some(a), Some(e)) if a >= e
                    ),
                    "$lte" => matches!(
                        (as_f64(actual), as_f64(expected)),
                        (Some(a), Some(e)) if a <= e
                    ),
                    "$in" => expected
                        .as_array()
                        .map(|arr| arr.contains(actual))
                        .unwrap_or(false),
                    // Unknown operators are passed through verbatim to the
                    // provider; locally they match nothing.
                    _ => false,
                }
            }),
            // Bare scalar means equality.
            other => actual == Some(other),
        }
    }

    /// Evaluate a filter object against record metadata.
    pub fn matches(filter: &Value, metadata: &Value) -> bool {
        let Value::Object(fields) = filter else {
            return true;
        };
        fields
            .iter()
            .all(|(field, clause)| clause_matches(metadata.get(field), clause))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn eq_and_range_clauses() {
            let meta = json!({ "type": "message", "date": 1_700_000_100i64 });
            let f = json!({ "type": { "$eq": "message" }, "date": { "$gte": 1_700_000_000i64 } });
            assert!(matches(&f, &meta));

            let f = json!({ "date": { "$lte": 1_699_999_999i64 } });
            assert!(!matches(&f, &meta));
        }

        #[test]
        fn bare_scalar_is_equality() {
            let meta = json!({ "unread": true });
            assert!(matches(&json!({ "unread": true }), &meta));
            assert!(!matches(&json!({ "unread": false }), &meta));
        }

        #[test]
        fn in_clause() {
            let meta = json!({ "from_domain": "linkedin.com" });
            let f = json!({ "from_domain": { "$in": ["linkedin.com", "github.com"] } });
            assert!(matches(&f, &meta));
        }

        #[test]
        fn missing_field_fails_clause() {
            let meta = json!({ "type": "message" });
            assert!(!matches(&json!({ "bucket": { "$eq": "2025-W43" } }), &meta));
        }

        #[test]
        fn with_merges_and_replaces() {
            let f = with(None, "type", eq("message"));
            let f = with(Some(f), "date", gte(100));
            let f = with(Some(f), "type", eq("thread_week"));
            assert_eq!(f["type"]["$eq"], "thread_week");
            assert_eq!(f["date"]["$gte"], 100);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RecordType::ThreadWeek).unwrap(),
            "\"thread_week\""
        );
        for rt in RecordType::ALL {
            let json = serde_json::to_string(&rt).unwrap();
            let back: RecordType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, rt);
        }
    }

    #[test]
    fn sparse_dot_aligns_indices() {
        let a = SparseVector {
            indices: vec![1, 5, 9],
            values: vec![1.0, 2.0, 3.0],
        };
        let b = SparseVector {
            indices: vec![5, 9, 12],
            values: vec![0.5, 1.0, 4.0],
        };
        assert!((a.dot(&b) - (2.0 * 0.5 + 3.0 * 1.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn metadata_round_trips_with_type_key() {
        let meta = RecordMetadata {
            record_type: RecordType::Message,
            grant_id: "g1".into(),
            email_id: "m1".into(),
            thread_id: "t1".into(),
            subject: "Hello".into(),
            from: "a@b.com".into(),
            from_domain: "b.com".into(),
            to: vec!["c@d.com".into()],
            date: 1_700_000_000,
            date_created: "2023-11-14T22:13:20Z".into(),
            snippet: "Hello there".into(),
            has_attachments: false,
            unread: true,
            bucket: None,
        };
        let value = meta.to_value();
        assert_eq!(value["type"], "message");
        assert_eq!(value["grant_id"], "g1");
        assert!(value.get("bucket").is_none());
    }
}
