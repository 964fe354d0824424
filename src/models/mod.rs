mod entity_type;
mod mapping;
mod record;
mod report;
mod sync_run;
mod transform;

pub use entity_type::EntityType;
pub use mapping::{
    ConflictResolution, EntityMapping, FieldMapping, MappingUpdate, SyncDirection, SyncMode,
};
pub use record::{FieldTimestamps, Fields, LocalRecord, LocalSyncStatus, RemoteRecord, StatusCounts};
pub use report::{AnalysisReport, ComparisonResult, SyncStatus};
pub use sync_run::{EntityState, ErrorKind, RecordError, RunState, SyncRun};
pub use transform::{values_equal, FieldType, Transform, TransformError};
