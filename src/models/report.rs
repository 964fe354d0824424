use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity_type::EntityType;
use super::record::StatusCounts;
use super::sync_run::EntityState;

/// Snapshot of the remote side of one entity type, produced by one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub entity_type: EntityType,
    pub total_records: usize,
    pub new_records: usize,
    pub updated_records: usize,
    pub matched_records: usize,
    pub error_records: usize,
    pub last_analyzed: DateTime<Utc>,
}

impl AnalysisReport {
    pub fn empty(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            total_records: 0,
            new_records: 0,
            updated_records: 0,
            matched_records: 0,
            error_records: 0,
            last_analyzed: Utc::now(),
        }
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Analysis: {}", self.entity_type)?;
        writeln!(f, "  Total:    {}", self.total_records)?;
        writeln!(f, "  New:      {}", self.new_records)?;
        writeln!(f, "  Updated:  {}", self.updated_records)?;
        writeln!(f, "  Matched:  {}", self.matched_records)?;
        writeln!(f, "  Errors:   {}", self.error_records)?;
        write!(f, "  Analyzed: {}", self.last_analyzed.to_rfc3339())
    }
}

/// Remote and local sides of one entity type, compared in a single pass.
///
/// `matched + conflicts + remote_only` covers every remote record that did
/// not fail mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub entity_type: EntityType,
    pub remote_only: usize,
    pub local_only: usize,
    pub matched: usize,
    pub conflicts: usize,
    /// Records the executor can act on without a pending manual review.
    pub ready_to_sync: usize,
    pub compared_at: DateTime<Utc>,
}

impl fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Comparison: {}", self.entity_type)?;
        writeln!(f, "  Remote only:   {}", self.remote_only)?;
        writeln!(f, "  Local only:    {}", self.local_only)?;
        writeln!(f, "  Matched:       {}", self.matched)?;
        writeln!(f, "  Conflicts:     {}", self.conflicts)?;
        write!(f, "  Ready to sync: {}", self.ready_to_sync)
    }
}

/// Cumulative counters for one entity type plus the local table's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub total_synced: i64,
    pub total_errors: i64,
    pub last_sync: Option<DateTime<Utc>>,
    pub state: EntityState,
    pub local: StatusCounts,
}
