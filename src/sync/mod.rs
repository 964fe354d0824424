//! Cross-system synchronization engine.
//!
//! Records flow from the [`RemoteSource`] through the [`RemoteExtractor`]
//! into a single reconciliation pass against the [`LocalStore`]. The pass
//! produces an analysis and a comparison for the [`ReportStore`] and, when
//! executing, a plan that the resolver and executor apply record by record.
//!
//! ```text
//! Scheduler -> SyncEngine -> RemoteExtractor + LocalStore
//!                         -> reconcile -> resolve -> Executor
//! ```

mod assets;
mod engine;
mod executor;
mod http_client;
mod local;
mod reconcile;
mod registry;
mod remote;
mod report_store;
mod resolver;
mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use assets::AssetStore;
pub use engine::{EngineError, SyncEngine};
pub use executor::Executor;
pub use http_client::HttpRemote;
pub use local::{LocalStore, LocalStoreError, UpsertOutcome};
pub use reconcile::{
    map_remote, reconcile, to_remote_fields, FieldDiff, MappedRecord, Reconciliation, RecordDiff,
};
pub use registry::{MappingError, MappingRegistry, RunGuard};
pub use remote::{ExtractError, RemoteError, RemoteExtractor, RemotePage, RemoteSource, RetryPolicy};
pub use report_store::{ReportSnapshot, ReportStore};
pub use resolver::{resolve, Resolution, ResolvedRecord};
pub use scheduler::{is_due, Scheduler, TickOutcome};
