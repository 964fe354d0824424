//! Conflict resolution policies for records that differ on both sides.

use chrono::{DateTime, Utc};

use super::reconcile::{FieldDiff, RecordDiff};
use crate::models::{ConflictResolution, Fields};

/// The winning values for one conflicting record.
///
/// `local_patch` holds remote values to write into the local row and
/// `remote_patch` holds local values to push to the remote, both in local
/// field names. Either may be empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedRecord {
    pub key: String,
    pub local_patch: Fields,
    pub remote_patch: Fields,
}

impl ResolvedRecord {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    fn take_remote(&mut self, diff: &FieldDiff) {
        self.local_patch.insert(diff.field.clone(), diff.remote.clone());
    }

    fn take_local(&mut self, diff: &FieldDiff) {
        if let Some(value) = &diff.local {
            self.remote_patch.insert(diff.field.clone(), value.clone());
        }
    }

    /// True when neither side needs a write.
    pub fn is_noop(&self) -> bool {
        self.local_patch.is_empty() && self.remote_patch.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedRecord),
    /// Left for an operator; excluded from automatic execution.
    Deferred,
}

/// Applies a conflict policy to one record's field diff.
pub fn resolve(diff: &RecordDiff, policy: ConflictResolution) -> Resolution {
    let mut resolved = ResolvedRecord::new(diff.key());

    match policy {
        ConflictResolution::ManualReview => return Resolution::Deferred,
        ConflictResolution::RemoteWins => diff.fields.iter().for_each(|f| resolved.take_remote(f)),
        ConflictResolution::LocalWins => diff.fields.iter().for_each(|f| resolved.take_local(f)),
        ConflictResolution::LatestWins => {
            let remote_newer = newer(diff.remote.modified_at, diff.local.modified_at);
            for field in &diff.fields {
                let remote_at = diff.remote.field_modified_at.get(&field.field);
                let local_at = diff.local.field_modified_at.get(&field.field);
                let remote_wins = match (remote_at, local_at) {
                    (Some(r), Some(l)) => r >= l,
                    _ => remote_newer,
                };
                if remote_wins {
                    resolved.take_remote(field);
                } else {
                    resolved.take_local(field);
                }
            }
        }
    }

    Resolution::Resolved(resolved)
}

/// Record-wide comparison. A remote record without a timestamp loses; ties
/// go to the remote side.
fn newer(remote: Option<DateTime<Utc>>, local: DateTime<Utc>) -> bool {
    remote.is_some_and(|r| r >= local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LocalRecord, FieldTimestamps};
    use crate::sync::reconcile::MappedRecord;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn diff(remote_at: Option<DateTime<Utc>>, local_at: DateTime<Utc>) -> RecordDiff {
        let mut remote_fields = Fields::new();
        remote_fields.insert("name".into(), json!("Remote name"));
        remote_fields.insert("price".into(), json!(12));
        let mut local_fields = Fields::new();
        local_fields.insert("name".into(), json!("Local name"));
        local_fields.insert("price".into(), json!(10));

        RecordDiff {
            remote: MappedRecord {
                key: "7".into(),
                fields: remote_fields,
                modified_at: remote_at,
                field_modified_at: FieldTimestamps::new(),
            },
            local: LocalRecord::new("7", local_fields).with_modified_at(local_at),
            fields: vec![
                FieldDiff {
                    field: "name".into(),
                    remote: json!("Remote name"),
                    local: Some(json!("Local name")),
                },
                FieldDiff {
                    field: "price".into(),
                    remote: json!(12),
                    local: Some(json!(10)),
                },
            ],
        }
    }

    fn resolved(resolution: Resolution) -> ResolvedRecord {
        match resolution {
            Resolution::Resolved(r) => r,
            Resolution::Deferred => panic!("expected a resolution"),
        }
    }

    #[test]
    fn test_remote_wins_overwrites_every_diff_field() {
        let r = resolved(resolve(&diff(Some(t(1)), t(5)), ConflictResolution::RemoteWins));
        assert_eq!(r.local_patch.len(), 2);
        assert_eq!(r.local_patch.get("price"), Some(&json!(12)));
        assert!(r.remote_patch.is_empty());
    }

    #[test]
    fn test_local_wins_never_touches_local() {
        let r = resolved(resolve(&diff(Some(t(9)), t(1)), ConflictResolution::LocalWins));
        assert!(r.local_patch.is_empty());
        assert_eq!(r.remote_patch.get("name"), Some(&json!("Local name")));
    }

    #[test]
    fn test_manual_review_defers() {
        assert_eq!(
            resolve(&diff(Some(t(1)), t(2)), ConflictResolution::ManualReview),
            Resolution::Deferred
        );
    }

    #[test]
    fn test_latest_wins_record_wide() {
        let r = resolved(resolve(&diff(Some(t(6)), t(5)), ConflictResolution::LatestWins));
        assert_eq!(r.local_patch.len(), 2);

        let r = resolved(resolve(&diff(Some(t(4)), t(5)), ConflictResolution::LatestWins));
        assert!(r.local_patch.is_empty());
        assert_eq!(r.remote_patch.len(), 2);

        // No remote timestamp: the local side is treated as newer
        let r = resolved(resolve(&diff(None, t(5)), ConflictResolution::LatestWins));
        assert!(r.local_patch.is_empty());
    }

    #[test]
    fn test_latest_wins_field_by_field() {
        let mut d = diff(Some(t(1)), t(5));
        // The remote price changed after the local edit, the name did not
        d.remote.field_modified_at.insert("price".into(), t(6));
        d.local.field_modified_at.insert("price".into(), t(5));
        d.remote.field_modified_at.insert("name".into(), t(1));
        d.local.field_modified_at.insert("name".into(), t(5) + Duration::minutes(1));

        let r = resolved(resolve(&d, ConflictResolution::LatestWins));
        assert_eq!(r.local_patch.get("price"), Some(&json!(12)));
        assert!(!r.local_patch.contains_key("name"));
        assert_eq!(r.remote_patch.get("name"), Some(&json!("Local name")));
    }

    #[test]
    fn test_local_value_missing_is_not_pushed() {
        let mut d = diff(Some(t(1)), t(2));
        d.fields[0].local = None;
        let r = resolved(resolve(&d, ConflictResolution::LocalWins));
        assert!(!r.remote_patch.contains_key("name"));
        assert!(r.remote_patch.contains_key("price"));
    }
}
