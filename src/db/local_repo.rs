use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::parse_timestamp;
use crate::models::{
    values_equal, FieldTimestamps, Fields, LocalRecord, LocalSyncStatus, StatusCounts,
};
use crate::sync::{LocalStore, LocalStoreError, UpsertOutcome};

/// SQLite-backed store for the ERP's entity rows.
#[derive(Clone)]
pub struct LocalRecordRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct LocalRecordRow {
    record_key: String,
    fields: String,
    modified_at: String,
    field_modified_at: String,
    sync_status: String,
}

impl LocalRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, table: &str, key: &str) -> Result<Option<LocalRecord>, LocalStoreError> {
        let row: Option<LocalRecordRow> = sqlx::query_as(
            r#"
            SELECT record_key, fields, modified_at, field_modified_at, sync_status
            FROM local_records WHERE local_table = ? AND record_key = ?
            "#,
        )
        .bind(table)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(hydrate_record).transpose()
    }

    /// Reason recorded by the last failed sync of a row, if any.
    pub async fn last_error(&self, table: &str, key: &str) -> Result<Option<String>, LocalStoreError> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT last_error FROM local_records WHERE local_table = ? AND record_key = ?",
        )
        .bind(table)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| r.0))
    }
}

#[async_trait]
impl LocalStore for LocalRecordRepository {
    async fn fetch_all(&self, table: &str) -> Result<Vec<LocalRecord>, LocalStoreError> {
        let rows: Vec<LocalRecordRow> = sqlx::query_as(
            r#"
            SELECT record_key, fields, modified_at, field_modified_at, sync_status
            FROM local_records WHERE local_table = ? ORDER BY record_key
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(hydrate_record).collect()
    }

    async fn upsert(
        &self,
        table: &str,
        record: &LocalRecord,
    ) -> Result<UpsertOutcome, LocalStoreError> {
        if record.key.trim().is_empty() {
            return Err(LocalStoreError::Validation(
                "record key must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let existing: Option<LocalRecordRow> = sqlx::query_as(
            r#"
            SELECT record_key, fields, modified_at, field_modified_at, sync_status
            FROM local_records WHERE local_table = ? AND record_key = ?
            "#,
        )
        .bind(table)
        .bind(&record.key)
        .fetch_optional(&mut *tx)
        .await?;

        let existing = existing.map(hydrate_record).transpose()?;
        let outcome = if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        };

        // Stamp every field whose value changed, then let explicit
        // per-field timestamps from the caller win.
        let mut field_times = existing
            .as_ref()
            .map(|e| e.field_modified_at.clone())
            .unwrap_or_default();
        for (name, value) in &record.fields {
            let unchanged = existing
                .as_ref()
                .and_then(|e| e.fields.get(name))
                .is_some_and(|old| values_equal(old, value));
            if !unchanged {
                field_times.insert(name.clone(), record.modified_at);
            }
        }
        field_times.extend(record.field_modified_at.iter().map(|(k, v)| (k.clone(), *v)));

        let fields = serde_json::to_string(&record.fields)
            .map_err(|e| LocalStoreError::Validation(e.to_string()))?;
        let field_times = serde_json::to_string(&field_times)
            .map_err(|e| LocalStoreError::Validation(e.to_string()))?;
        let synced_at = (record.sync_status == LocalSyncStatus::Synced).then(|| Utc::now().to_rfc3339());

        sqlx::query(
            r#"
            INSERT INTO local_records
                (local_table, record_key, fields, modified_at, field_modified_at, sync_status, last_error, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
            ON CONFLICT(local_table, record_key) DO UPDATE SET
                fields = excluded.fields,
                modified_at = excluded.modified_at,
                field_modified_at = excluded.field_modified_at,
                sync_status = excluded.sync_status,
                last_error = NULL,
                synced_at = COALESCE(excluded.synced_at, local_records.synced_at)
            "#,
        )
        .bind(table)
        .bind(&record.key)
        .bind(&fields)
        .bind(record.modified_at.to_rfc3339())
        .bind(&field_times)
        .bind(record.sync_status.as_str())
        .bind(synced_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn mark_error(&self, table: &str, key: &str, reason: &str) -> Result<(), LocalStoreError> {
        sqlx::query(
            "UPDATE local_records SET sync_status = 'error', last_error = ? WHERE local_table = ? AND record_key = ?",
        )
        .bind(reason)
        .bind(table)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_by_status(&self, table: &str) -> Result<StatusCounts, LocalStoreError> {
        let (total, synced, errors): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN sync_status = 'synced' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sync_status = 'error' THEN 1 ELSE 0 END), 0)
            FROM local_records WHERE local_table = ?
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        Ok(StatusCounts {
            total,
            synced,
            errors,
        })
    }
}

fn hydrate_record(row: LocalRecordRow) -> Result<LocalRecord, LocalStoreError> {
    let fields: Fields = serde_json::from_str(&row.fields)
        .map_err(|e| LocalStoreError::Corrupt(format!("{}: fields: {}", row.record_key, e)))?;
    let field_modified_at: FieldTimestamps = serde_json::from_str(&row.field_modified_at)
        .map_err(|e| {
            LocalStoreError::Corrupt(format!("{}: field_modified_at: {}", row.record_key, e))
        })?;

    Ok(LocalRecord {
        modified_at: parse_timestamp("modified_at", &row.modified_at)?,
        key: row.record_key,
        fields,
        field_modified_at,
        sync_status: LocalSyncStatus::parse(&row.sync_status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_pool;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let (pool, _dir) = temp_pool().await;
        let repo = LocalRecordRepository::new(pool);

        let record = LocalRecord::new("42", fields(&[("name", json!("Widget"))]));
        let outcome = repo.upsert("items", &record).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let mut changed = record.clone();
        changed.fields.insert("price".into(), json!(9.5));
        let outcome = repo.upsert("items", &changed).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let fetched = repo.get("items", "42").await.unwrap().unwrap();
        assert_eq!(fetched.fields.get("price"), Some(&json!(9.5)));
        assert_eq!(repo.fetch_all("items").await.unwrap().len(), 1);
        // Tables are isolated
        assert!(repo.fetch_all("customers").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty_key() {
        let (pool, _dir) = temp_pool().await;
        let repo = LocalRecordRepository::new(pool);

        let record = LocalRecord::new("  ", Fields::new());
        let err = repo.upsert("items", &record).await.unwrap_err();
        assert!(matches!(err, LocalStoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_upsert_tracks_per_field_timestamps() {
        let (pool, _dir) = temp_pool().await;
        let repo = LocalRecordRepository::new(pool);

        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t2 = t1 + Duration::hours(5);

        let record = LocalRecord::new("1", fields(&[("name", json!("A")), ("price", json!(1.0))]))
            .with_modified_at(t1);
        repo.upsert("items", &record).await.unwrap();

        let mut changed = record.clone().with_modified_at(t2);
        changed.fields.insert("price".into(), json!(2.0));
        repo.upsert("items", &changed).await.unwrap();

        let fetched = repo.get("items", "1").await.unwrap().unwrap();
        assert_eq!(fetched.modified_at, t2);
        assert_eq!(fetched.field_modified_at.get("name"), Some(&t1));
        assert_eq!(fetched.field_modified_at.get("price"), Some(&t2));
    }

    #[tokio::test]
    async fn test_mark_error_and_count_by_status() {
        let (pool, _dir) = temp_pool().await;
        let repo = LocalRecordRepository::new(pool);

        for key in ["1", "2", "3"] {
            let record = LocalRecord::new(key, Fields::new()).with_status(LocalSyncStatus::Synced);
            repo.upsert("vendors", &record).await.unwrap();
        }
        repo.upsert("vendors", &LocalRecord::new("4", Fields::new()))
            .await
            .unwrap();
        repo.mark_error("vendors", "2", "remote rejected email")
            .await
            .unwrap();
        // Unknown keys are ignored
        repo.mark_error("vendors", "99", "nope").await.unwrap();

        let counts = repo.count_by_status("vendors").await.unwrap();
        assert_eq!(
            counts,
            StatusCounts {
                total: 4,
                synced: 2,
                errors: 1
            }
        );
        assert_eq!(
            repo.last_error("vendors", "2").await.unwrap().as_deref(),
            Some("remote rejected email")
        );

        let empty = repo.count_by_status("customers").await.unwrap();
        assert_eq!(empty, StatusCounts::default());
    }

    #[tokio::test]
    async fn test_successful_upsert_clears_error() {
        let (pool, _dir) = temp_pool().await;
        let repo = LocalRecordRepository::new(pool);

        let record = LocalRecord::new("1", Fields::new()).with_status(LocalSyncStatus::Synced);
        repo.upsert("items", &record).await.unwrap();
        repo.mark_error("items", "1", "boom").await.unwrap();
        repo.upsert("items", &record).await.unwrap();

        let fetched = repo.get("items", "1").await.unwrap().unwrap();
        assert_eq!(fetched.sync_status, LocalSyncStatus::Synced);
        assert_eq!(repo.last_error("items", "1").await.unwrap(), None);
    }
}
