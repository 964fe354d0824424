use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::entity_type::EntityType;

/// Scheduling state of one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    Idle,
    Running,
    Disabled,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::Idle => write!(f, "idle"),
            EntityState::Running => write!(f, "running"),
            EntityState::Disabled => write!(f, "disabled"),
        }
    }
}

/// Lifecycle of a single execution.
///
/// `pending -> extracting -> reconciling -> applying -> completed`; any
/// non-terminal state may move to `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Extracting,
    Reconciling,
    Applying,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Extracting => "extracting",
            RunState::Reconciling => "reconciling",
            RunState::Applying => "applying",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunState::Pending),
            "extracting" => Some(RunState::Extracting),
            "reconciling" => Some(RunState::Reconciling),
            "applying" => Some(RunState::Applying),
            "completed" => Some(RunState::Completed),
            "failed" => Some(RunState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    fn can_advance_to(&self, next: RunState) -> bool {
        match (self, next) {
            (from, RunState::Failed) => !from.is_terminal(),
            (RunState::Pending, RunState::Extracting)
            | (RunState::Extracting, RunState::Reconciling)
            | (RunState::Reconciling, RunState::Applying)
            | (RunState::Applying, RunState::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of a record's sync failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Mapping or validation of the record's fields.
    Field,
    /// A write to the local store.
    Local,
    /// A push to the remote platform.
    Remote,
    /// The image step, which never fails the record itself.
    Image,
}

/// A failing record kept for later inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Identity key of the record, when it could be resolved.
    pub key: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl RecordError {
    pub fn new(key: Option<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            key,
            kind,
            message: message.into(),
        }
    }
}

/// One execution instance of the executor for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub mapping_version: i64,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub failed: usize,
    pub image_failures: usize,
    pub errors: Vec<RecordError>,
    /// Run-level failure that stopped the run, distinct from record errors.
    pub fatal_error: Option<String>,
}

impl SyncRun {
    pub fn new(entity_type: EntityType, mapping_version: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type,
            mapping_version,
            state: RunState::Pending,
            started_at: Utc::now(),
            finished_at: None,
            created: 0,
            updated: 0,
            skipped: 0,
            deferred: 0,
            failed: 0,
            image_failures: 0,
            errors: Vec::new(),
            fatal_error: None,
        }
    }

    /// Moves the run to `next`, ignoring transitions the state machine
    /// does not allow.
    pub fn advance(&mut self, next: RunState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.fatal_error = Some(reason.into());
        self.advance(RunState::Failed);
    }

    pub fn record_failure(&mut self, error: RecordError) {
        if error.kind == ErrorKind::Image {
            self.image_failures += 1;
        } else {
            self.failed += 1;
        }
        self.errors.push(error);
    }

    /// Records written on either side by this run.
    pub fn synced(&self) -> usize {
        self.created + self.updated
    }
}

impl fmt::Display for SyncRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({}): {}", self.id, self.entity_type, self.state)?;
        writeln!(
            f,
            "  created {}, updated {}, skipped {}, deferred {}, failed {}",
            self.created, self.updated, self.skipped, self.deferred, self.failed
        )?;
        if self.image_failures > 0 {
            writeln!(f, "  image failures: {}", self.image_failures)?;
        }
        if let Some(reason) = &self.fatal_error {
            writeln!(f, "  fatal: {}", reason)?;
        }
        for error in &self.errors {
            writeln!(
                f,
                "  - [{:?}] {}: {}",
                error.kind,
                error.key.as_deref().unwrap_or("<unknown>"),
                error.message
            )?;
        }
        Ok(())
    }
}
