use sqlx::SqlitePool;
use uuid::Uuid;

use super::{decode_error, parse_timestamp};
use crate::models::{EntityType, RecordError, RunState, SyncRun};

/// Audit log of sync runs.
#[derive(Clone)]
pub struct SyncRunRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SyncRunRow {
    id: String,
    entity_type: String,
    mapping_version: i64,
    state: String,
    started_at: String,
    finished_at: Option<String>,
    created: i64,
    updated: i64,
    skipped: i64,
    deferred: i64,
    failed: i64,
    image_failures: i64,
    errors: String,
    fatal_error: Option<String>,
}

impl SyncRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the run or replaces the stored copy with the same id.
    pub async fn save(&self, run: &SyncRun) -> Result<(), sqlx::Error> {
        let errors =
            serde_json::to_string(&run.errors).map_err(|e| sqlx::Error::Encode(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO sync_runs
                (id, entity_type, mapping_version, state, started_at, finished_at, created,
                 updated, skipped, deferred, failed, image_failures, errors, fatal_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                finished_at = excluded.finished_at,
                created = excluded.created,
                updated = excluded.updated,
                skipped = excluded.skipped,
                deferred = excluded.deferred,
                failed = excluded.failed,
                image_failures = excluded.image_failures,
                errors = excluded.errors,
                fatal_error = excluded.fatal_error
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.entity_type.as_str())
        .bind(run.mapping_version)
        .bind(run.state.as_str())
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|ts| ts.to_rfc3339()))
        .bind(run.created as i64)
        .bind(run.updated as i64)
        .bind(run.skipped as i64)
        .bind(run.deferred as i64)
        .bind(run.failed as i64)
        .bind(run.image_failures as i64)
        .bind(&errors)
        .bind(&run.fatal_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<SyncRun>, sqlx::Error> {
        let row: Option<SyncRunRow> = sqlx::query_as("SELECT * FROM sync_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(hydrate_run).transpose()
    }

    /// Most recent runs for an entity type, newest first.
    pub async fn list(&self, entity_type: EntityType, limit: i64) -> Result<Vec<SyncRun>, sqlx::Error> {
        let rows: Vec<SyncRunRow> = sqlx::query_as(
            "SELECT * FROM sync_runs WHERE entity_type = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(entity_type.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(hydrate_run).collect()
    }
}

fn hydrate_run(row: SyncRunRow) -> Result<SyncRun, sqlx::Error> {
    let errors: Vec<RecordError> = serde_json::from_str(&row.errors)
        .map_err(|e| decode_error(format!("invalid errors in run {}: {}", row.id, e)))?;

    Ok(SyncRun {
        id: Uuid::parse_str(&row.id).map_err(|e| decode_error(e.to_string()))?,
        entity_type: row.entity_type.parse::<EntityType>().map_err(decode_error)?,
        mapping_version: row.mapping_version,
        state: RunState::parse(&row.state)
            .ok_or_else(|| decode_error(format!("unknown run state '{}'", row.state)))?,
        started_at: parse_timestamp("started_at", &row.started_at)?,
        finished_at: row
            .finished_at
            .as_deref()
            .map(|ts| parse_timestamp("finished_at", ts))
            .transpose()?,
        created: row.created.max(0) as usize,
        updated: row.updated.max(0) as usize,
        skipped: row.skipped.max(0) as usize,
        deferred: row.deferred.max(0) as usize,
        failed: row.failed.max(0) as usize,
        image_failures: row.image_failures.max(0) as usize,
        errors,
        fatal_error: row.fatal_error,
    })
}
