use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{EngineError, SyncEngine};
use crate::models::{EntityMapping, EntityType, SyncMode, SyncRun};

/// What one timer tick did for one entity type.
#[derive(Debug)]
pub enum TickOutcome {
    /// An execution was started in its own task.
    Triggered(JoinHandle<Result<SyncRun, EngineError>>),
    NotDue,
    /// A previous action is still in flight.
    Busy,
    Rejected(EngineError),
}

/// True when a timer-driven mapping should run at `now`.
pub fn is_due(mapping: &EntityMapping, now: DateTime<Utc>) -> bool {
    if mapping.sync_mode == SyncMode::Manual {
        return false;
    }
    match mapping.last_sync {
        None => true,
        Some(last) => {
            now - last >= ChronoDuration::minutes(i64::from(mapping.sync_frequency_minutes))
        }
    }
}

/// Re-evaluates automatic and scheduled mappings on a fixed interval.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, tick: Duration) -> Self {
        Self { engine, tick }
    }

    /// Evaluates every timer-driven mapping once. Manual mappings are not
    /// considered.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<(EntityType, TickOutcome)>, EngineError> {
        let registry = self.engine.registry();
        let mut outcomes = Vec::new();

        for mapping in self.engine.mappings().await? {
            if mapping.sync_mode == SyncMode::Manual {
                continue;
            }
            let entity_type = mapping.entity_type;

            let outcome = if !mapping.enabled {
                debug!("Skipping scheduled {} sync: mapping disabled", entity_type);
                TickOutcome::Rejected(EngineError::Disabled(entity_type))
            } else if registry.is_running(entity_type) {
                TickOutcome::Busy
            } else if !is_due(&mapping, now) {
                TickOutcome::NotDue
            } else {
                info!("Scheduled {} sync is due", entity_type);
                let engine = self.engine.clone();
                TickOutcome::Triggered(tokio::spawn(async move {
                    let result = engine.execute(entity_type).await;
                    if let Err(e) = &result {
                        warn!("Scheduled {} sync failed: {}", entity_type, e);
                    }
                    result
                }))
            };
            outcomes.push((entity_type, outcome));
        }

        Ok(outcomes)
    }

    /// Ticks forever. Started runs continue independently of the loop.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Scheduler started (every {:?})", self.tick);

        loop {
            interval.tick().await;
            if let Err(e) = self.tick(Utc::now()).await {
                warn!("Scheduler tick failed: {}", e);
            }
        }
    }
}
