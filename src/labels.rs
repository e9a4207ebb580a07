//! Read-only lookup of a template's declared inspection fields.
//!
//! The mapping is produced by a separate template-parsing job into the
//! `form_template_key_label_pairs` collection:
//!
//! ```json
//! { "qc_form_template_id": 368, "fields": [{ "key": "moisture", "label": "水分" }] }
//! ```

use anyhow::Result;
use serde_json::{json, Value};
use tracing::debug;

use crate::documents::{DocFilter, DocumentStore, LABEL_PAIRS_COLLECTION};
use crate::models::LabelField;

/// Declared fields of `template_id`, in mapping order. `None` when the
/// template has no mapping document at all.
pub async fn resolve_labels(
    store: &dyn DocumentStore,
    template_id: i64,
) -> Result<Option<Vec<LabelField>>> {
    let filter = DocFilter::new().equals("qc_form_template_id", json!(template_id));
    let Some(mapping) = store.find_one(LABEL_PAIRS_COLLECTION, &filter).await? else {
        return Ok(None);
    };
    Ok(Some(parse_fields(template_id, &mapping)))
}

fn parse_fields(template_id: i64, mapping: &Value) -> Vec<LabelField> {
    let entries = mapping
        .get("fields")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut fields = Vec::with_capacity(entries.len());
    for entry in entries {
        let key = entry.get("key").and_then(Value::as_str);
        let label = entry.get("label").and_then(Value::as_str);
        match (key, label) {
            (Some(key), Some(label)) if !key.is_empty() => fields.push(LabelField {
                key: key.to_string(),
                label: label.to_string(),
            }),
            _ => debug!(template_id, ?entry, "Ignoring incomplete label entry"),
        }
    }
    fields
}
