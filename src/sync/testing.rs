//! Scripted adapters for engine tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::local::{LocalStore, LocalStoreError, UpsertOutcome};
use super::remote::{RemoteError, RemotePage, RemoteSource};
use crate::models::{Fields, LocalRecord, LocalSyncStatus, RemoteRecord, StatusCounts};

/// A remote item as the platform would return it.
pub fn remote_record(id: &str, name: &str, rate: i64) -> RemoteRecord {
    let mut fields = Fields::new();
    fields.insert("item_id".into(), json!(id));
    fields.insert("name".into(), json!(name));
    fields.insert("rate".into(), json!(rate));
    RemoteRecord::new(fields)
}

/// The local row the default item mapping produces for `remote_record`.
pub fn local_record(id: &str, name: &str, price: i64) -> LocalRecord {
    let mut fields = Fields::new();
    fields.insert("remote_id".into(), json!(id));
    fields.insert("name".into(), json!(name));
    fields.insert("price".into(), json!(price));
    LocalRecord::new(id, fields).with_status(LocalSyncStatus::Synced)
}

#[derive(Default)]
struct FakeState {
    records: HashMap<String, Vec<RemoteRecord>>,
    page_failures: HashMap<usize, RemoteError>,
    refresh_failure: Option<RemoteError>,
    page_calls: usize,
    refresh_calls: usize,
    upserts: Vec<(String, Option<String>, Fields)>,
    rejected_upserts: HashSet<String>,
    images: HashMap<String, Vec<u8>>,
    image_failures: HashMap<String, usize>,
    image_calls: usize,
}

/// In-memory remote platform with scripted failures.
///
/// Cursors are record offsets. Page calls are numbered from 1 across the
/// fake's lifetime so a failure can be pinned to a specific call.
pub struct FakeRemote {
    page_size: usize,
    key_field: String,
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            page_size: 50,
            key_field: "item_id".to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_key_field(mut self, key_field: &str) -> Self {
        self.key_field = key_field.to_string();
        self
    }

    pub fn set_records(&self, module: &str, records: Vec<RemoteRecord>) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(module.to_string(), records);
    }

    pub fn records(&self, module: &str) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(module)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_page_call(&self, call: usize, error: RemoteError) {
        self.state.lock().unwrap().page_failures.insert(call, error);
    }

    pub fn fail_refresh(&self, error: RemoteError) {
        self.state.lock().unwrap().refresh_failure = Some(error);
    }

    pub fn reject_upsert(&self, key: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected_upserts
            .insert(key.to_string());
    }

    pub fn set_image(&self, key: &str, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(key.to_string(), bytes.to_vec());
    }

    /// Makes the next `times` image fetches for `key` fail.
    pub fn fail_image(&self, key: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .image_failures
            .insert(key.to_string(), times);
    }

    pub fn page_calls(&self) -> usize {
        self.state.lock().unwrap().page_calls
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().unwrap().refresh_calls
    }

    pub fn image_calls(&self) -> usize {
        self.state.lock().unwrap().image_calls
    }

    pub fn upserts(&self) -> Vec<(String, Option<String>, Fields)> {
        self.state.lock().unwrap().upserts.clone()
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn fetch_page(&self, module: &str, cursor: Option<&str>) -> Result<RemotePage, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.page_calls += 1;
        let call = state.page_calls;
        if let Some(err) = state.page_failures.remove(&call) {
            return Err(err);
        }

        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|e| RemoteError::Decode(e.to_string()))?,
            None => 0,
        };
        let records = state.records.get(module).cloned().unwrap_or_default();
        let end = (start + self.page_size).min(records.len());
        let page = records.get(start..end).map(|r| r.to_vec()).unwrap_or_default();

        Ok(RemotePage {
            records: page,
            next_cursor: (end < records.len()).then(|| end.to_string()),
        })
    }

    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.refresh_calls += 1;
        match state.refresh_failure.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn upsert(&self, module: &str, id: Option<&str>, fields: &Fields) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        let key = id
            .map(str::to_string)
            .or_else(|| {
                fields
                    .get(&self.key_field)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        if state.rejected_upserts.contains(&key) {
            return Err(RemoteError::Api {
                status: 400,
                message: format!("record {} rejected", key),
            });
        }

        state
            .upserts
            .push((module.to_string(), id.map(str::to_string), fields.clone()));

        let key_field = self.key_field.clone();
        let records = state.records.entry(module.to_string()).or_default();
        let existing = records
            .iter_mut()
            .find(|r| r.fields.get(&key_field).and_then(|v| v.as_str()) == Some(key.as_str()));
        match existing {
            Some(record) => {
                for (name, value) in fields {
                    record.fields.insert(name.clone(), value.clone());
                }
            }
            None => records.push(RemoteRecord::new(fields.clone())),
        }
        Ok(())
    }

    async fn fetch_image(&self, _module: &str, id: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.image_calls += 1;
        if let Some(remaining) = state.image_failures.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Transport("image download reset".into()));
            }
        }
        Ok(state.images.get(id).cloned())
    }
}

/// Wraps a store and rejects writes for chosen keys.
pub struct FlakyLocal<S> {
    inner: S,
    rejected: Mutex<HashSet<String>>,
    fail_fetch: AtomicBool,
}

impl<S: LocalStore> FlakyLocal<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            rejected: Mutex::new(HashSet::new()),
            fail_fetch: AtomicBool::new(false),
        }
    }

    pub fn reject(&self, key: &str) {
        self.rejected.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_fetch(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: LocalStore> LocalStore for FlakyLocal<S> {
    async fn fetch_all(&self, table: &str) -> Result<Vec<LocalRecord>, LocalStoreError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(LocalStoreError::Corrupt("table unreadable".into()));
        }
        self.inner.fetch_all(table).await
    }

    async fn upsert(&self, table: &str, record: &LocalRecord) -> Result<UpsertOutcome, LocalStoreError> {
        let rejected = self.rejected.lock().unwrap().contains(&record.key);
        if rejected {
            return Err(LocalStoreError::Validation(format!(
                "record {} failed local validation",
                record.key
            )));
        }
        self.inner.upsert(table, record).await
    }

    async fn mark_error(&self, table: &str, key: &str, reason: &str) -> Result<(), LocalStoreError> {
        self.inner.mark_error(table, key, reason).await
    }

    async fn count_by_status(&self, table: &str) -> Result<StatusCounts, LocalStoreError> {
        self.inner.count_by_status(table).await
    }
}
