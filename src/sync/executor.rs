//! Applies a reconciliation plan record by record.

use chrono::Utc;
use tracing::{debug, warn};

use super::assets::AssetStore;
use super::local::LocalStore;
use super::reconcile::{to_remote_fields, MappedRecord, Reconciliation, RecordDiff};
use super::remote::RemoteSource;
use super::resolver::{resolve, Resolution};
use crate::models::{
    EntityMapping, ErrorKind, FieldTimestamps, LocalRecord, LocalSyncStatus, RecordError, SyncRun,
};

/// Attempts per record for the image step.
const IMAGE_ATTEMPTS: u32 = 3;

/// Writes one run's worth of changes.
///
/// Every record is independent: a failing write is recorded on the run and
/// the remaining records are still processed.
pub struct Executor<'a> {
    mapping: &'a EntityMapping,
    local: &'a dyn LocalStore,
    remote: &'a dyn RemoteSource,
    assets: &'a AssetStore,
}

impl<'a> Executor<'a> {
    pub fn new(
        mapping: &'a EntityMapping,
        local: &'a dyn LocalStore,
        remote: &'a dyn RemoteSource,
        assets: &'a AssetStore,
    ) -> Self {
        Self {
            mapping,
            local,
            remote,
            assets,
        }
    }

    pub async fn apply(&self, plan: &Reconciliation, run: &mut SyncRun) {
        for error in &plan.errors {
            self.fail_record(run, error.clone()).await;
        }
        for record in &plan.new_records {
            self.apply_new(record, run).await;
        }
        for diff in &plan.updated {
            self.apply_diff(diff, run).await;
        }
        if self.mapping.sync_direction.writes_remote() {
            for record in &plan.local_only {
                self.push_local_only(record, run).await;
            }
        }
    }

    async fn fail_record(&self, run: &mut SyncRun, error: RecordError) {
        warn!(
            "{} record {} failed: {}",
            self.mapping.entity_type,
            error.key.as_deref().unwrap_or("<unknown>"),
            error.message
        );
        // Image failures leave the row's field data valid
        let flag_key = error.key.as_deref().filter(|_| error.kind != ErrorKind::Image);
        if let Some(key) = flag_key {
            if let Err(e) = self
                .local
                .mark_error(&self.mapping.local_table, key, &error.message)
                .await
            {
                warn!("Could not flag local record {}: {}", key, e);
            }
        }
        run.record_failure(error);
    }

    async fn apply_new(&self, record: &MappedRecord, run: &mut SyncRun) {
        if !self.mapping.sync_direction.writes_local() || !self.mapping.auto_create {
            run.skipped += 1;
            return;
        }

        let local = LocalRecord {
            key: record.key.clone(),
            fields: record.fields.clone(),
            modified_at: record.modified_at.unwrap_or_else(Utc::now),
            field_modified_at: record.field_modified_at.clone(),
            sync_status: LocalSyncStatus::Synced,
        };
        match self.local.upsert(&self.mapping.local_table, &local).await {
            Ok(_) => {
                debug!("Created {} {}", self.mapping.entity_type, record.key);
                run.created += 1;
                self.sync_image(&record.key, run).await;
            }
            Err(e) => {
                let error = RecordError::new(Some(record.key.clone()), ErrorKind::Local, e.to_string());
                self.fail_record(run, error).await;
            }
        }
    }

    async fn apply_diff(&self, diff: &RecordDiff, run: &mut SyncRun) {
        let resolved = match resolve(diff, self.mapping.conflict_resolution) {
            Resolution::Deferred => {
                debug!("Deferred {} {} for review", self.mapping.entity_type, diff.key());
                run.deferred += 1;
                return;
            }
            Resolution::Resolved(r) => r,
        };
        if !self.mapping.auto_update {
            run.skipped += 1;
            return;
        }

        let direction = self.mapping.sync_direction;
        let mut wrote_local = false;
        let mut wrote_remote = false;

        if direction.writes_local() && !resolved.local_patch.is_empty() {
            let mut record = diff.local.clone();
            for (name, value) in &resolved.local_patch {
                record.fields.insert(name.clone(), value.clone());
            }
            record.field_modified_at = diff
                .remote
                .field_modified_at
                .iter()
                .filter(|(name, _)| resolved.local_patch.contains_key(*name))
                .map(|(name, at)| (name.clone(), *at))
                .collect::<FieldTimestamps>();
            record.modified_at = diff
                .remote
                .modified_at
                .unwrap_or_else(Utc::now)
                .max(diff.local.modified_at);
            record.sync_status = LocalSyncStatus::Synced;

            if let Err(e) = self.local.upsert(&self.mapping.local_table, &record).await {
                let error = RecordError::new(Some(resolved.key.clone()), ErrorKind::Local, e.to_string());
                self.fail_record(run, error).await;
                return;
            }
            wrote_local = true;
        }

        if direction.writes_remote() && !resolved.remote_patch.is_empty() {
            let fields = to_remote_fields(self.mapping, &resolved.remote_patch);
            if let Err(e) = self
                .remote
                .upsert(&self.mapping.remote_module, Some(&resolved.key), &fields)
                .await
            {
                let error = RecordError::new(Some(resolved.key.clone()), ErrorKind::Remote, e.to_string());
                self.fail_record(run, error).await;
                return;
            }
            wrote_remote = true;
        }

        if wrote_local || wrote_remote {
            debug!(
                "Updated {} {} (local: {}, remote: {})",
                self.mapping.entity_type, resolved.key, wrote_local, wrote_remote
            );
            run.updated += 1;
            if wrote_local {
                self.sync_image(&resolved.key, run).await;
            }
        } else {
            run.skipped += 1;
        }
    }

    async fn push_local_only(&self, record: &LocalRecord, run: &mut SyncRun) {
        if !self.mapping.auto_create {
            run.skipped += 1;
            return;
        }

        let fields = to_remote_fields(self.mapping, &record.fields);
        if let Err(e) = self
            .remote
            .upsert(&self.mapping.remote_module, None, &fields)
            .await
        {
            let error = RecordError::new(Some(record.key.clone()), ErrorKind::Remote, e.to_string());
            self.fail_record(run, error).await;
            return;
        }
        debug!("Created remote {} {}", self.mapping.entity_type, record.key);
        run.created += 1;

        if record.sync_status != LocalSyncStatus::Synced {
            let synced = record.clone().with_status(LocalSyncStatus::Synced);
            if let Err(e) = self.local.upsert(&self.mapping.local_table, &synced).await {
                warn!("Could not mark {} {} synced: {}", self.mapping.entity_type, record.key, e);
            }
        }
    }

    /// Fetches and stores the record's image. Failures are counted on the
    /// run but never fail the record's field data.
    async fn sync_image(&self, key: &str, run: &mut SyncRun) {
        if !self.mapping.sync_images {
            return;
        }

        let mut last_error = String::new();
        for attempt in 1..=IMAGE_ATTEMPTS {
            match self.remote.fetch_image(&self.mapping.remote_module, key).await {
                Ok(None) => return,
                Ok(Some(bytes)) => {
                    match self.assets.store(self.mapping.entity_type, key, &bytes).await {
                        Ok(path) => {
                            debug!("Stored image for {} at {}", key, path.display());
                            return;
                        }
                        Err(e) => last_error = e.to_string(),
                    }
                }
                Err(e) => last_error = e.to_string(),
            }
            debug!(
                "Image attempt {}/{} for {} failed: {}",
                attempt, IMAGE_ATTEMPTS, key, last_error
            );
        }

        let error = RecordError::new(
            Some(key.to_string()),
            ErrorKind::Image,
            format!("image not stored after {} attempts: {}", IMAGE_ATTEMPTS, last_error),
        );
        self.fail_record(run, error).await;
    }
}
