use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{AnalysisReport, ComparisonResult, EntityType, SyncRun};

/// Latest reports for one entity type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSnapshot {
    pub analysis: Option<AnalysisReport>,
    pub comparison: Option<ComparisonResult>,
    pub last_run: Option<SyncRun>,
}

/// Holds the most recent reports per entity type.
///
/// Each write replaces the previous snapshot whole; readers get owned
/// copies and never observe a snapshot being assembled.
#[derive(Clone, Default)]
pub struct ReportStore {
    inner: Arc<RwLock<HashMap<EntityType, ReportSnapshot>>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the analysis and comparison of one reconciliation pass.
    pub async fn store_pass(&self, analysis: AnalysisReport, comparison: ComparisonResult) {
        let mut reports = self.inner.write().await;
        let entry = reports.entry(analysis.entity_type).or_default();
        entry.analysis = Some(analysis);
        entry.comparison = Some(comparison);
    }

    /// Records a finished run. The pass it acted on no longer describes
    /// the data, so the stored analysis and comparison are dropped.
    pub async fn store_run(&self, run: SyncRun) {
        let mut reports = self.inner.write().await;
        let entry = reports.entry(run.entity_type).or_default();
        entry.analysis = None;
        entry.comparison = None;
        entry.last_run = Some(run);
    }

    pub async fn snapshot(&self, entity_type: EntityType) -> ReportSnapshot {
        self.inner
            .read()
            .await
            .get(&entity_type)
            .cloned()
            .unwrap_or_default()
    }
}
