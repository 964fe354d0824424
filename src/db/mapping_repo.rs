use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{decode_error, parse_timestamp};
use crate::models::{
    ConflictResolution, EntityMapping, EntityType, FieldMapping, SyncDirection, SyncMode,
};

/// Durable storage for entity mappings.
///
/// Configuration and counters are written by separate statements so a
/// configuration edit never clobbers counters written by a finished run.
#[derive(Clone)]
pub struct MappingRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MappingRow {
    entity_type: String,
    remote_module: String,
    local_table: String,
    enabled: bool,
    sync_direction: String,
    sync_mode: String,
    sync_frequency_minutes: i64,
    conflict_resolution: String,
    sync_images: bool,
    auto_create: bool,
    auto_update: bool,
    field_mappings: String,
    total_synced: i64,
    total_errors: i64,
    last_sync: Option<String>,
    version: i64,
}

impl MappingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, entity_type: EntityType) -> Result<Option<EntityMapping>, sqlx::Error> {
        let row: Option<MappingRow> =
            sqlx::query_as("SELECT * FROM entity_mappings WHERE entity_type = ?")
                .bind(entity_type.as_str())
                .fetch_optional(&self.pool)
                .await?;

        row.map(hydrate_mapping).transpose()
    }

    pub async fn list(&self) -> Result<Vec<EntityMapping>, sqlx::Error> {
        let rows: Vec<MappingRow> =
            sqlx::query_as("SELECT * FROM entity_mappings ORDER BY entity_type")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(hydrate_mapping).collect()
    }

    /// Inserts the mapping unless one already exists for its entity type.
    ///
    /// Returns true if a row was inserted.
    pub async fn insert_if_missing(&self, mapping: &EntityMapping) -> Result<bool, sqlx::Error> {
        let field_mappings = encode_fields(&mapping.field_mappings)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO entity_mappings
                (entity_type, remote_module, local_table, enabled, sync_direction, sync_mode,
                 sync_frequency_minutes, conflict_resolution, sync_images, auto_create, auto_update,
                 field_mappings, total_synced, total_errors, last_sync, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mapping.entity_type.as_str())
        .bind(&mapping.remote_module)
        .bind(&mapping.local_table)
        .bind(mapping.enabled)
        .bind(mapping.sync_direction.as_str())
        .bind(mapping.sync_mode.as_str())
        .bind(mapping.sync_frequency_minutes as i64)
        .bind(mapping.conflict_resolution.as_str())
        .bind(mapping.sync_images)
        .bind(mapping.auto_create)
        .bind(mapping.auto_update)
        .bind(&field_mappings)
        .bind(mapping.total_synced)
        .bind(mapping.total_errors)
        .bind(mapping.last_sync.map(|ts| ts.to_rfc3339()))
        .bind(mapping.version)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replaces every configuration column in one statement and bumps the
    /// version. Counters and `last_sync` are not touched.
    pub async fn save_config(&self, mapping: &EntityMapping) -> Result<EntityMapping, sqlx::Error> {
        let field_mappings = encode_fields(&mapping.field_mappings)?;

        let result = sqlx::query(
            r#"
            UPDATE entity_mappings
            SET remote_module = ?, local_table = ?, enabled = ?, sync_direction = ?,
                sync_mode = ?, sync_frequency_minutes = ?, conflict_resolution = ?,
                sync_images = ?, auto_create = ?, auto_update = ?, field_mappings = ?,
                version = version + 1, updated_at = ?
            WHERE entity_type = ?
            "#,
        )
        .bind(&mapping.remote_module)
        .bind(&mapping.local_table)
        .bind(mapping.enabled)
        .bind(mapping.sync_direction.as_str())
        .bind(mapping.sync_mode.as_str())
        .bind(mapping.sync_frequency_minutes as i64)
        .bind(mapping.conflict_resolution.as_str())
        .bind(mapping.sync_images)
        .bind(mapping.auto_create)
        .bind(mapping.auto_update)
        .bind(&field_mappings)
        .bind(Utc::now().to_rfc3339())
        .bind(mapping.entity_type.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        self.get(mapping.entity_type)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Adds a finished run's totals to the cumulative counters.
    pub async fn record_run(
        &self,
        entity_type: EntityType,
        synced: i64,
        errors: i64,
        finished_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE entity_mappings
            SET total_synced = total_synced + ?, total_errors = total_errors + ?, last_sync = ?
            WHERE entity_type = ?
            "#,
        )
        .bind(synced)
        .bind(errors)
        .bind(finished_at.to_rfc3339())
        .bind(entity_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn encode_fields(fields: &[FieldMapping]) -> Result<String, sqlx::Error> {
    serde_json::to_string(fields).map_err(|e| sqlx::Error::Encode(e.into()))
}

fn hydrate_mapping(row: MappingRow) -> Result<EntityMapping, sqlx::Error> {
    let field_mappings: Vec<FieldMapping> = serde_json::from_str(&row.field_mappings)
        .map_err(|e| decode_error(format!("invalid field_mappings: {}", e)))?;

    Ok(EntityMapping {
        entity_type: row.entity_type.parse::<EntityType>().map_err(decode_error)?,
        remote_module: row.remote_module,
        local_table: row.local_table,
        enabled: row.enabled,
        sync_direction: row.sync_direction.parse::<SyncDirection>().map_err(decode_error)?,
        sync_mode: row.sync_mode.parse::<SyncMode>().map_err(decode_error)?,
        sync_frequency_minutes: row.sync_frequency_minutes.max(0) as u32,
        conflict_resolution: row
            .conflict_resolution
            .parse::<ConflictResolution>()
            .map_err(decode_error)?,
        sync_images: row.sync_images,
        auto_create: row.auto_create,
        auto_update: row.auto_update,
        field_mappings,
        total_synced: row.total_synced,
        total_errors: row.total_errors,
        last_sync: row
            .last_sync
            .as_deref()
            .map(|ts| parse_timestamp("last_sync", ts))
            .transpose()?,
        version: row.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_pool;

    #[tokio::test]
    async fn test_insert_and_get_mapping() {
        let (pool, _dir) = temp_pool().await;
        let repo = MappingRepository::new(pool);

        let mapping = EntityMapping::default_for(EntityType::Item);
        assert!(repo.insert_if_missing(&mapping).await.unwrap());

        let fetched = repo.get(EntityType::Item).await.unwrap().unwrap();
        assert_eq!(fetched, mapping);
        assert!(repo.get(EntityType::Vendor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_if_missing_keeps_existing() {
        let (pool, _dir) = temp_pool().await;
        let repo = MappingRepository::new(pool);

        let mut mapping = EntityMapping::default_for(EntityType::Customer);
        repo.insert_if_missing(&mapping).await.unwrap();

        mapping.remote_module = "customers_v2".to_string();
        assert!(!repo.insert_if_missing(&mapping).await.unwrap());

        let fetched = repo.get(EntityType::Customer).await.unwrap().unwrap();
        assert_eq!(fetched.remote_module, "contacts");
    }

    #[tokio::test]
    async fn test_save_config_bumps_version_and_keeps_counters() {
        let (pool, _dir) = temp_pool().await;
        let repo = MappingRepository::new(pool);

        let mapping = EntityMapping::default_for(EntityType::Vendor);
        repo.insert_if_missing(&mapping).await.unwrap();
        repo.record_run(EntityType::Vendor, 7, 2, Utc::now())
            .await
            .unwrap();

        let mut edited = mapping.clone();
        edited.sync_mode = SyncMode::Scheduled;
        edited.sync_frequency_minutes = 15;
        edited.conflict_resolution = ConflictResolution::ManualReview;
        // Stale counters on the edited copy must not be written back
        edited.total_synced = 0;

        let saved = repo.save_config(&edited).await.unwrap();
        assert_eq!(saved.version, mapping.version + 1);
        assert_eq!(saved.sync_mode, SyncMode::Scheduled);
        assert_eq!(saved.sync_frequency_minutes, 15);
        assert_eq!(saved.total_synced, 7);
        assert_eq!(saved.total_errors, 2);
        assert!(saved.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_save_config_missing_row() {
        let (pool, _dir) = temp_pool().await;
        let repo = MappingRepository::new(pool);

        let mapping = EntityMapping::default_for(EntityType::Item);
        let err = repo.save_config(&mapping).await.unwrap_err();
        assert!(matches!(err, sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let (pool, _dir) = temp_pool().await;
        let repo = MappingRepository::new(pool);

        for entity in EntityType::ALL {
            repo.insert_if_missing(&EntityMapping::default_for(entity))
                .await
                .unwrap();
        }

        let mappings = repo.list().await.unwrap();
        let names: Vec<_> = mappings.iter().map(|m| m.entity_type.as_str()).collect();
        assert_eq!(names, vec!["customer", "item", "vendor"]);
    }
}
