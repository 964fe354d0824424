use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field name -> value, as stored on either side.
pub type Fields = Map<String, Value>;

/// Per-field last-modified timestamps.
pub type FieldTimestamps = BTreeMap<String, DateTime<Utc>>;

/// A record as read from the remote platform, in remote field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_modified_at: FieldTimestamps,
}

impl RemoteRecord {
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            modified_at: None,
            field_modified_at: BTreeMap::new(),
        }
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    pub fn with_field_modified_at(mut self, field: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.field_modified_at.insert(field.into(), at);
        self
    }
}

/// Sync state of a local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocalSyncStatus {
    #[default]
    Pending,
    Synced,
    Error,
}

impl LocalSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalSyncStatus::Pending => "pending",
            LocalSyncStatus::Synced => "synced",
            LocalSyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "synced" => LocalSyncStatus::Synced,
            "error" => LocalSyncStatus::Error,
            _ => LocalSyncStatus::Pending,
        }
    }
}

/// A row of one of the ERP's entity tables, in local field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Identity key value shared with the remote record.
    pub key: String,
    pub fields: Fields,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_modified_at: FieldTimestamps,
    #[serde(default)]
    pub sync_status: LocalSyncStatus,
}

impl LocalRecord {
    pub fn new(key: impl Into<String>, fields: Fields) -> Self {
        Self {
            key: key.into(),
            fields,
            modified_at: Utc::now(),
            field_modified_at: BTreeMap::new(),
            sync_status: LocalSyncStatus::Pending,
        }
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn with_status(mut self, status: LocalSyncStatus) -> Self {
        self.sync_status = status;
        self
    }
}

/// Counts returned by the local store for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: i64,
    pub synced: i64,
    pub errors: i64,
}
