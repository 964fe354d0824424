use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::assets::AssetStore;
use super::executor::Executor;
use super::local::{LocalStore, LocalStoreError};
use super::reconcile::{reconcile, Reconciliation};
use super::registry::{MappingError, MappingRegistry, RunGuard};
use super::remote::{ExtractError, RemoteExtractor, RemoteSource, RetryPolicy};
use super::report_store::{ReportSnapshot, ReportStore};
use crate::db::SyncRunRepository;
use crate::models::{
    AnalysisReport, ComparisonResult, EntityMapping, EntityType, MappingUpdate, RunState,
    SyncRun, SyncStatus,
};

/// Failure of a triggered action as a whole. Per-record failures are kept
/// on the [`SyncRun`] instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0} mapping disabled")]
    Disabled(EntityType),
    #[error("A sync for {0} is already running")]
    AlreadyRunning(EntityType),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("Remote extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("Local store error: {0}")]
    Local(#[from] LocalStoreError),
    #[error("Run log error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Entry point for every analysis, comparison and execution.
pub struct SyncEngine {
    registry: MappingRegistry,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteSource>,
    runs: SyncRunRepository,
    reports: ReportStore,
    assets: AssetStore,
    retry: RetryPolicy,
}

impl SyncEngine {
    pub fn new(
        registry: MappingRegistry,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteSource>,
        runs: SyncRunRepository,
        assets: AssetStore,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            local,
            remote,
            runs,
            reports: ReportStore::new(),
            assets,
            retry,
        }
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub async fn mappings(&self) -> Result<Vec<EntityMapping>, EngineError> {
        Ok(self.registry.list().await?)
    }

    pub async fn mapping(&self, entity_type: EntityType) -> Result<EntityMapping, EngineError> {
        Ok(self.registry.get(entity_type).await?)
    }

    pub async fn update_mapping(
        &self,
        entity_type: EntityType,
        update: &MappingUpdate,
    ) -> Result<EntityMapping, EngineError> {
        Ok(self.registry.update(entity_type, update).await?)
    }

    /// Reads the mapping fresh and claims the entity for one action.
    async fn begin(&self, entity_type: EntityType) -> Result<(EntityMapping, RunGuard), EngineError> {
        let mapping = self.registry.get(entity_type).await?;
        if !mapping.enabled {
            warn!("Rejected trigger for {}: mapping disabled", entity_type);
            return Err(EngineError::Disabled(entity_type));
        }
        let guard = self.registry.try_begin(entity_type).ok_or_else(|| {
            warn!("Rejected trigger for {}: already running", entity_type);
            EngineError::AlreadyRunning(entity_type)
        })?;
        Ok((mapping, guard))
    }

    /// One extraction and reconciliation pass. Its reports replace the
    /// stored ones.
    async fn pass(&self, mapping: &EntityMapping) -> Result<Reconciliation, EngineError> {
        let locals = self.local.fetch_all(&mapping.local_table).await?;
        let extractor = RemoteExtractor::new(self.remote.as_ref(), self.retry);
        let plan = reconcile(mapping, locals, extractor.fetch_all(&mapping.remote_module)).await?;
        self.reports
            .store_pass(plan.analysis.clone(), plan.comparison.clone())
            .await;
        Ok(plan)
    }

    pub async fn analyze(&self, entity_type: EntityType) -> Result<AnalysisReport, EngineError> {
        let (mapping, _guard) = self.begin(entity_type).await?;
        info!("Analyzing {}", entity_type);

        let plan = self.pass(&mapping).await.inspect_err(|e| {
            error!("Analysis of {} failed: {}", entity_type, e);
        })?;
        info!(
            "Analyzed {}: {} records, {} new, {} updated, {} errors",
            entity_type,
            plan.analysis.total_records,
            plan.analysis.new_records,
            plan.analysis.updated_records,
            plan.analysis.error_records
        );
        Ok(plan.analysis)
    }

    /// The comparison from the latest pass, or a fresh pass when none is
    /// stored or `refresh` is set. A disabled mapping is rejected either way.
    pub async fn compare(
        &self,
        entity_type: EntityType,
        refresh: bool,
    ) -> Result<ComparisonResult, EngineError> {
        if !refresh {
            let mapping = self.registry.get(entity_type).await?;
            if !mapping.enabled {
                return Err(EngineError::Disabled(entity_type));
            }
            if let Some(comparison) = self.reports.snapshot(entity_type).await.comparison {
                return Ok(comparison);
            }
        }

        let (mapping, _guard) = self.begin(entity_type).await?;
        let plan = self.pass(&mapping).await.inspect_err(|e| {
            error!("Comparison of {} failed: {}", entity_type, e);
        })?;
        Ok(plan.comparison)
    }

    /// Runs one full sync. Counters are written once, after every record
    /// has been processed; a run-level failure leaves them untouched.
    pub async fn execute(&self, entity_type: EntityType) -> Result<SyncRun, EngineError> {
        let (mapping, _guard) = self.begin(entity_type).await?;

        let mut run = SyncRun::new(entity_type, mapping.version);
        info!(
            "Starting {} run {} (mapping v{})",
            entity_type, run.id, mapping.version
        );
        self.runs.save(&run).await?;

        run.advance(RunState::Extracting);
        let plan = match self.pass(&mapping).await {
            Ok(plan) => plan,
            Err(e) => return Err(self.abort(run, e).await),
        };

        run.advance(RunState::Reconciling);
        run.advance(RunState::Applying);
        self.runs.save(&run).await?;

        Executor::new(
            &mapping,
            self.local.as_ref(),
            self.remote.as_ref(),
            &self.assets,
        )
        .apply(&plan, &mut run)
        .await;

        if let Err(e) = self
            .registry
            .record_run(entity_type, run.synced(), run.failed, Utc::now())
            .await
        {
            return Err(self.abort(run, e.into()).await);
        }

        run.advance(RunState::Completed);
        self.runs.save(&run).await?;
        info!(
            "Finished {} run {}: {} created, {} updated, {} skipped, {} deferred, {} failed",
            entity_type, run.id, run.created, run.updated, run.skipped, run.deferred, run.failed
        );

        self.reports.store_run(run.clone()).await;
        Ok(run)
    }

    async fn abort(&self, mut run: SyncRun, err: EngineError) -> EngineError {
        error!("{} run {} failed: {}", run.entity_type, run.id, err);
        run.fail(err.to_string());
        if let Err(e) = self.runs.save(&run).await {
            warn!("Could not record failed run {}: {}", run.id, e);
        }
        self.reports.store_run(run).await;
        err
    }

    pub async fn status(&self, entity_type: EntityType) -> Result<SyncStatus, EngineError> {
        let mapping = self.registry.get(entity_type).await?;
        let local = self.local.count_by_status(&mapping.local_table).await?;

        Ok(SyncStatus {
            total_synced: mapping.total_synced,
            total_errors: mapping.total_errors,
            last_sync: mapping.last_sync,
            state: self.registry.state(&mapping),
            local,
        })
    }

    /// Most recent runs, newest first.
    pub async fn runs(&self, entity_type: EntityType, limit: i64) -> Result<Vec<SyncRun>, EngineError> {
        self.registry.get(entity_type).await?;
        Ok(self.runs.list(entity_type, limit).await?)
    }

    pub async fn reports(&self, entity_type: EntityType) -> ReportSnapshot {
        self.reports.snapshot(entity_type).await
    }
}
