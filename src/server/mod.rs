//! HTTP surface of the sync engine.

mod api;

pub use api::{router, ApiError, AppState};
