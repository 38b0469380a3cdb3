//! Map classified worker rows onto the fixed export schema.
//!
//! Normalization is total over [`WorkerRecord`]: profiles, error rows and
//! unparseable values all become a [`NormalizedProfileRecord`] that carries
//! every field in [`PROFILE_FIELDS`].
//!
//! - present fields are copied; list and object values become compact JSON text
//! - missing (or `null`) list fields become `"[]"`, everything else [`SENTINEL`]
//! - `scraped_at` falls back to the current time, `profile_url` to the sentinel
//! - fields outside the schema are kept as extra columns
//! - row-level failures keep their message in the `error` column

use serde_json::{Map, Value};

use crate::models::{
    ERROR_FIELD, LIST_FIELDS, NormalizedProfileRecord, PROFILE_FIELDS, RawProfileRecord, SENTINEL,
    WorkerRecord,
};
use crate::utils::{now_timestamp, truncate_for_log};

/// Normalize one row, stamping it with the current time if the worker did not.
pub fn normalize(record: WorkerRecord) -> NormalizedProfileRecord {
    normalize_at(record, &now_timestamp())
}

/// [`normalize`] with an explicit fallback timestamp.
pub fn normalize_at(record: WorkerRecord, scraped_at: &str) -> NormalizedProfileRecord {
    match record {
        WorkerRecord::Profile(raw) => flatten_record(raw, None, scraped_at),
        WorkerRecord::Failed { error, raw } => flatten_record(raw, Some(error), scraped_at),
        WorkerRecord::Unparseable(value) => {
            let error = format!(
                "unparseable worker output: {}",
                truncate_for_log(&value.to_string(), 200)
            );
            flatten_record(RawProfileRecord::default(), Some(error), scraped_at)
        }
    }
}

fn flatten_record(
    raw: RawProfileRecord,
    error: Option<String>,
    scraped_at: &str,
) -> NormalizedProfileRecord {
    let mut source = raw.0;
    let mut fields = Map::new();

    for field in PROFILE_FIELDS {
        let value = match source.remove(field) {
            None | Some(Value::Null) => default_for(field, scraped_at),
            Some(value) => to_scalar(value),
        };
        fields.insert(field.to_string(), value);
    }

    for (column, value) in source {
        let value = match value {
            Value::Null => Value::String(SENTINEL.to_string()),
            other => to_scalar(other),
        };
        fields.insert(column, value);
    }

    if let Some(error) = error {
        fields.insert(ERROR_FIELD.to_string(), Value::String(error));
    }

    NormalizedProfileRecord { fields }
}

fn default_for(field: &str, scraped_at: &str) -> Value {
    if field == "scraped_at" {
        Value::String(scraped_at.to_string())
    } else if LIST_FIELDS.contains(&field) {
        Value::String("[]".to_string())
    } else {
        Value::String(SENTINEL.to_string())
    }
}

fn to_scalar(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        scalar => scalar,
    }
}
