//! Matching remote records against the local table in a single pass.

use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::remote::ExtractError;
use crate::models::{
    values_equal, AnalysisReport, ComparisonResult, ConflictResolution, EntityMapping, ErrorKind,
    FieldTimestamps, Fields, LocalRecord, RecordError, RemoteRecord, SyncDirection,
};

/// A remote record translated into local field names and types.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub key: String,
    pub fields: Fields,
    pub modified_at: Option<DateTime<Utc>>,
    /// Per-field timestamps, keyed by local field name.
    pub field_modified_at: FieldTimestamps,
}

/// One field that differs between the two sides.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub field: String,
    pub remote: Value,
    /// `None` when the local row lacks the field entirely.
    pub local: Option<Value>,
}

/// A record present on both sides with differing mapped values.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDiff {
    pub remote: MappedRecord,
    pub local: LocalRecord,
    pub fields: Vec<FieldDiff>,
}

impl RecordDiff {
    pub fn key(&self) -> &str {
        &self.remote.key
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub analysis: AnalysisReport,
    pub comparison: ComparisonResult,
    pub new_records: Vec<MappedRecord>,
    pub updated: Vec<RecordDiff>,
    /// Local rows the remote never returned.
    pub local_only: Vec<LocalRecord>,
    pub errors: Vec<RecordError>,
}

/// Translates one remote record through the mapping's field table.
///
/// Missing or unconvertible required fields fail the record. Optional
/// fields that are absent are skipped, and optional fields that fail to
/// convert are dropped.
pub fn map_remote(mapping: &EntityMapping, record: &RemoteRecord) -> Result<MappedRecord, RecordError> {
    let mut fields = Fields::new();
    let mut field_modified_at = FieldTimestamps::new();
    let mut key = None;

    let raw_key = mapping
        .key_field()
        .and_then(|f| record.fields.get(&f.remote_field))
        .filter(|v| !v.is_null())
        .map(key_string);

    for field in &mapping.field_mappings {
        let raw = match record.fields.get(&field.remote_field) {
            Some(v) if !v.is_null() => v,
            _ => {
                if field.is_required {
                    return Err(RecordError::new(
                        raw_key.clone(),
                        ErrorKind::Field,
                        format!("missing required field '{}'", field.remote_field),
                    ));
                }
                continue;
            }
        };

        let converted = match field.transform {
            Some(transform) => transform.apply(raw),
            None => Ok(raw.clone()),
        }
        .and_then(|v| field.field_type.coerce(&v));

        let value = match converted {
            Ok(v) => v,
            Err(e) if field.is_required => {
                return Err(RecordError::new(
                    raw_key.clone(),
                    ErrorKind::Field,
                    format!("field '{}': {}", field.remote_field, e),
                ));
            }
            Err(e) => {
                warn!(
                    "Dropping optional field '{}' of {} record {:?}: {}",
                    field.remote_field, mapping.entity_type, raw_key, e
                );
                continue;
            }
        };

        if field.is_key {
            key = Some(key_string(&value));
        }
        if let Some(at) = record.field_modified_at.get(&field.remote_field) {
            field_modified_at.insert(field.local_field.clone(), *at);
        }
        fields.insert(field.local_field.clone(), value);
    }

    let key = key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
        RecordError::new(raw_key.clone(), ErrorKind::Field, "identity key is empty")
    })?;

    Ok(MappedRecord {
        key,
        fields,
        modified_at: record.modified_at,
        field_modified_at,
    })
}

/// Translates local values back into remote field names, applying each
/// transform's inverse where one exists.
pub fn to_remote_fields(mapping: &EntityMapping, local: &Fields) -> Fields {
    let mut fields = Fields::new();
    for field in &mapping.field_mappings {
        let Some(value) = local.get(&field.local_field) else {
            continue;
        };
        let value = match field.transform.and_then(|t| t.inverse()) {
            Some(inverse) => match inverse.apply(value) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Pushing '{}' untransformed: {}", field.local_field, e);
                    value.clone()
                }
            },
            None => value.clone(),
        };
        fields.insert(field.remote_field.clone(), value);
    }
    fields
}

fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn diff_fields(remote: &MappedRecord, local: &LocalRecord) -> Vec<FieldDiff> {
    remote
        .fields
        .iter()
        .filter_map(|(name, value)| {
            let local_value = local.fields.get(name);
            match local_value {
                Some(lv) if values_equal(lv, value) => None,
                _ => Some(FieldDiff {
                    field: name.clone(),
                    remote: value.clone(),
                    local: local_value.cloned(),
                }),
            }
        })
        .collect()
}

/// Consumes the remote stream once, classifying every record against the
/// local rows.
///
/// An extraction failure aborts the pass; nothing partial is returned.
pub async fn reconcile<S>(
    mapping: &EntityMapping,
    local_records: Vec<LocalRecord>,
    remote: S,
) -> Result<Reconciliation, ExtractError>
where
    S: Stream<Item = Result<RemoteRecord, ExtractError>>,
{
    let mut index: HashMap<String, LocalRecord> = local_records
        .into_iter()
        .map(|r| (r.key.clone(), r))
        .collect();
    let mut seen = HashSet::new();

    let mut analysis = AnalysisReport::empty(mapping.entity_type);
    let mut new_records = Vec::new();
    let mut updated = Vec::new();
    let mut errors = Vec::new();

    futures::pin_mut!(remote);
    while let Some(record) = remote.try_next().await? {
        analysis.total_records += 1;

        let mapped = match map_remote(mapping, &record) {
            Ok(m) => m,
            Err(e) => {
                debug!("{} record failed mapping: {}", mapping.entity_type, e.message);
                // The record still exists remotely, so its local row is not local-only
                if let Some(key) = &e.key {
                    index.remove(key);
                    seen.insert(key.clone());
                }
                errors.push(e);
                continue;
            }
        };

        if !seen.insert(mapped.key.clone()) {
            errors.push(RecordError::new(
                Some(mapped.key.clone()),
                ErrorKind::Field,
                "identity key returned more than once by remote",
            ));
            continue;
        }

        match index.remove(&mapped.key) {
            None => new_records.push(mapped),
            Some(local) => {
                let fields = diff_fields(&mapped, &local);
                if fields.is_empty() {
                    analysis.matched_records += 1;
                } else {
                    updated.push(RecordDiff {
                        remote: mapped,
                        local,
                        fields,
                    });
                }
            }
        }
    }

    analysis.new_records = new_records.len();
    analysis.updated_records = updated.len();
    analysis.error_records = errors.len();
    analysis.last_analyzed = Utc::now();

    let mut local_only: Vec<LocalRecord> = index.into_values().collect();
    local_only.sort_by(|a, b| a.key.cmp(&b.key));

    let ready_updates = if mapping.conflict_resolution == ConflictResolution::ManualReview {
        0
    } else {
        analysis.updated_records
    };
    let comparison = ComparisonResult {
        entity_type: mapping.entity_type,
        remote_only: analysis.new_records,
        local_only: if mapping.sync_direction == SyncDirection::RemoteToLocal {
            0
        } else {
            local_only.len()
        },
        matched: analysis.matched_records,
        conflicts: analysis.updated_records,
        ready_to_sync: analysis.new_records + ready_updates,
        compared_at: analysis.last_analyzed,
    };

    debug!(
        "Reconciled {}: {} total, {} new, {} updated, {} matched, {} errors, {} local only",
        mapping.entity_type,
        analysis.total_records,
        analysis.new_records,
        analysis.updated_records,
        analysis.matched_records,
        analysis.error_records,
        local_only.len()
    );

    Ok(Reconciliation {
        analysis,
        comparison,
        new_records,
        updated,
        local_only,
        errors,
    })
}
