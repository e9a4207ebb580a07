//! Tolerant parsing of schema-variable source documents.
//!
//! Source documents of the "same" template disagree on shape: ids arrive
//! as arrays, bare scalars, or comma-separated strings; timestamps arrive as
//! RFC 3339 strings, naive ISO strings, extended-JSON `$date` wrappers, or
//! epoch milliseconds. Everything downstream works on [`NormalizedDocument`]
//! so aggregation never has to look at raw JSON.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::SnapshotError;
use crate::models::JunctionKind;

/// Shape a field value arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<T> {
    Missing,
    Scalar(T),
    List(Vec<T>),
}

impl FieldValue<String> {
    /// Classify a raw JSON value. Nulls, empty strings and nested objects
    /// are dropped; numbers and booleans are rendered as text.
    pub fn from_json(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => FieldValue::Missing,
            Some(Value::Array(items)) => {
                FieldValue::List(items.iter().filter_map(scalar_text).collect())
            }
            Some(other) => match scalar_text(other) {
                Some(text) => FieldValue::Scalar(text),
                None => FieldValue::Missing,
            },
        }
    }

    /// Flatten to trimmed, non-empty strings. Scalars holding a
    /// comma-separated list are split.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            FieldValue::Scalar(text) => split_csv(&text),
            other => other.into_unsplit_vec(),
        }
    }

    /// Flatten without splitting scalars: `"Line 1, North"` stays one value.
    pub fn into_unsplit_vec(self) -> Vec<String> {
        match self {
            FieldValue::Missing => Vec::new(),
            FieldValue::Scalar(text) => vec![text],
            FieldValue::List(items) => items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(map) => return object_id(map),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// `{"$oid": "..."}` is the only object form accepted as an identifier.
fn object_id(map: &Map<String, Value>) -> Option<String> {
    map.get("$oid").and_then(Value::as_str).map(str::to_string)
}

fn split_csv(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse any supported timestamp encoding into UTC. Naive values are
/// taken as UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(map) => {
            let inner = map.get("$date")?;
            match inner {
                Value::Object(wrapped) => wrapped
                    .get("$numberLong")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<i64>().ok())
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                other => parse_timestamp(other),
            }
        }
        _ => None,
    }
}

pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// One approval event from `approval_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    pub suggest_retest: bool,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub comments: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Source document reduced to the attributes the pipeline reads.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub approver_updated_at: Option<DateTime<Utc>>,
    pub batch_ids: FieldValue<String>,
    pub product_ids: FieldValue<String>,
    pub shift_id: FieldValue<String>,
    pub team_id: FieldValue<String>,
    pub inspector_ids: FieldValue<String>,
    pub batch_names: FieldValue<String>,
    pub product_names: FieldValue<String>,
    pub shift_names: FieldValue<String>,
    pub team_names: FieldValue<String>,
    pub inspector_names: FieldValue<String>,
    pub field_keys: BTreeSet<String>,
    /// Parsed `approval_info`, or why it could not be read. Only retest
    /// extraction looks at this, so a bad entry never costs the document
    /// its place in the snapshot.
    pub approvals: Result<Vec<Approval>, String>,
}

impl NormalizedDocument {
    /// Identifiers of one related-entity category.
    pub fn entity_ids(&self, kind: JunctionKind) -> Vec<String> {
        let field = match kind {
            JunctionKind::Batch => &self.batch_ids,
            JunctionKind::Product => &self.product_ids,
            JunctionKind::Shift => &self.shift_id,
            JunctionKind::Team => &self.team_id,
            JunctionKind::Inspector => &self.inspector_ids,
        };
        field.clone().into_vec()
    }

    /// Display names of one related-entity category, as denormalized on the document.
    ///
    /// A document has one shift and one team, so their names are kept whole
    /// even when they contain commas.
    pub fn entity_names(&self, kind: JunctionKind) -> Vec<String> {
        match kind {
            JunctionKind::Batch => self.batch_names.clone().into_vec(),
            JunctionKind::Product => self.product_names.clone().into_vec(),
            JunctionKind::Shift => self.shift_names.clone().into_unsplit_vec(),
            JunctionKind::Team => self.team_names.clone().into_unsplit_vec(),
            JunctionKind::Inspector => self.inspector_names.clone().into_vec(),
        }
    }

    /// First approval flagged for re-inspection. Errors when `approval_info`
    /// was malformed.
    pub fn first_retest(&self) -> Result<Option<&Approval>, &str> {
        match &self.approvals {
            Ok(approvals) => Ok(approvals.iter().find(|a| a.suggest_retest)),
            Err(reason) => Err(reason.as_str()),
        }
    }
}

/// Normalize a raw document. Fails only when the document is not an object
/// or has no `_id`; a malformed `approval_info` is kept as an error on
/// [`NormalizedDocument::approvals`].
pub fn normalize_document(
    collection: &str,
    raw: &Value,
) -> Result<NormalizedDocument, SnapshotError> {
    let malformed = |reason: String| SnapshotError::MalformedDocument {
        collection: collection.to_string(),
        reason,
    };

    let obj = raw
        .as_object()
        .ok_or_else(|| malformed("document is not an object".to_string()))?;

    let id = obj
        .get("_id")
        .and_then(scalar_text)
        .ok_or_else(|| malformed("missing _id".to_string()))?;

    let approvals = match obj.get("approval_info") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                parse_approval(entry).map_err(|r| format!("approval_info[{}]: {}", i, r))
            })
            .collect::<Result<Vec<_>, _>>(),
        Some(_) => Err("approval_info is not a list".to_string()),
    };

    let get = |key: &str| FieldValue::from_json(obj.get(key));

    Ok(NormalizedDocument {
        created_at: obj.get("created_at").and_then(parse_timestamp),
        approver_updated_at: obj.get("approver_updated_at").and_then(parse_timestamp),
        batch_ids: get(JunctionKind::Batch.id_field()),
        product_ids: get(JunctionKind::Product.id_field()),
        shift_id: get(JunctionKind::Shift.id_field()),
        team_id: get(JunctionKind::Team.id_field()),
        inspector_ids: get(JunctionKind::Inspector.id_field()),
        batch_names: get(JunctionKind::Batch.name_field()),
        product_names: get(JunctionKind::Product.name_field()),
        shift_names: get(JunctionKind::Shift.name_field()),
        team_names: get(JunctionKind::Team.name_field()),
        inspector_names: get(JunctionKind::Inspector.name_field()),
        field_keys: obj.keys().cloned().collect(),
        approvals,
        id,
    })
}

fn parse_approval(entry: &Value) -> Result<Approval, String> {
    let obj = entry.as_object().ok_or("entry is not an object")?;
    let text = |key: &str| obj.get(key).and_then(scalar_text);
    Ok(Approval {
        // Only a literal boolean true counts.
        suggest_retest: matches!(obj.get("suggest_retest"), Some(Value::Bool(true))),
        user_id: text("user_id"),
        user_name: text("user_name"),
        comments: text("comments"),
        timestamp: obj.get("timestamp").and_then(parse_timestamp),
    })
}
