use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::db::MappingRepository;
use crate::models::{EntityMapping, EntityState, EntityType, MappingUpdate};

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("No mapping configured for {0}")]
    NotFound(EntityType),
    #[error("Invalid mapping: {0}")]
    Validation(String),
    #[error("Mapping storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Per-entity coordination state.
#[derive(Default)]
struct EntitySlot {
    /// Set while an analysis or execution holds the entity.
    running: AtomicBool,
    /// Serializes configuration edits against counter writes.
    write_lock: Mutex<()>,
}

/// Held by the single in-flight action of an entity type; dropping it
/// frees the entity.
pub struct RunGuard {
    slot: Arc<EntitySlot>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.slot.running.store(false, Ordering::Release);
    }
}

/// Validated access to entity mappings plus the per-entity mutual
/// exclusion every triggered action goes through.
#[derive(Clone)]
pub struct MappingRegistry {
    repo: MappingRepository,
    slots: Arc<HashMap<EntityType, Arc<EntitySlot>>>,
}

impl MappingRegistry {
    pub fn new(repo: MappingRepository) -> Self {
        let slots = EntityType::ALL
            .into_iter()
            .map(|e| (e, Arc::new(EntitySlot::default())))
            .collect();
        Self {
            repo,
            slots: Arc::new(slots),
        }
    }

    fn slot(&self, entity_type: EntityType) -> &Arc<EntitySlot> {
        // Every entity type gets a slot in `new`
        &self.slots[&entity_type]
    }

    /// Stores the shipped mapping for every entity type that has none.
    pub async fn seed_defaults(&self) -> Result<usize, MappingError> {
        let mut seeded = 0;
        for entity_type in EntityType::ALL {
            if self
                .repo
                .insert_if_missing(&EntityMapping::default_for(entity_type))
                .await?
            {
                info!("Seeded default {} mapping", entity_type);
                seeded += 1;
            }
        }
        Ok(seeded)
    }

    pub async fn get(&self, entity_type: EntityType) -> Result<EntityMapping, MappingError> {
        self.repo
            .get(entity_type)
            .await?
            .ok_or(MappingError::NotFound(entity_type))
    }

    pub async fn list(&self) -> Result<Vec<EntityMapping>, MappingError> {
        Ok(self.repo.list().await?)
    }

    /// Merges a partial edit into the stored mapping, validates the result
    /// and writes it whole. Nothing is written if validation fails.
    pub async fn update(
        &self,
        entity_type: EntityType,
        update: &MappingUpdate,
    ) -> Result<EntityMapping, MappingError> {
        if update.is_empty() {
            return Err(MappingError::Validation(
                "update contains no fields".to_string(),
            ));
        }

        let _lock = self.slot(entity_type).write_lock.lock().await;
        let current = self.get(entity_type).await?;
        let next = current.merged(update);
        next.validate().map_err(MappingError::Validation)?;

        let saved = self.repo.save_config(&next).await?;
        info!(
            "Updated {} mapping to version {} (enabled: {})",
            entity_type, saved.version, saved.enabled
        );
        Ok(saved)
    }

    /// Adds a finished run's totals to the mapping's counters.
    pub async fn record_run(
        &self,
        entity_type: EntityType,
        synced: usize,
        errors: usize,
        finished_at: DateTime<Utc>,
    ) -> Result<(), MappingError> {
        let _lock = self.slot(entity_type).write_lock.lock().await;
        self.repo
            .record_run(entity_type, synced as i64, errors as i64, finished_at)
            .await?;
        Ok(())
    }

    /// Claims the entity for one action. Returns `None` if another action
    /// already holds it.
    pub fn try_begin(&self, entity_type: EntityType) -> Option<RunGuard> {
        let slot = self.slot(entity_type);
        slot.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { slot: slot.clone() })
    }

    pub fn is_running(&self, entity_type: EntityType) -> bool {
        self.slot(entity_type).running.load(Ordering::Acquire)
    }

    /// Scheduling state of a mapping as of now.
    pub fn state(&self, mapping: &EntityMapping) -> EntityState {
        if self.is_running(mapping.entity_type) {
            EntityState::Running
        } else if !mapping.enabled {
            EntityState::Disabled
        } else {
            EntityState::Idle
        }
    }
}
