//! Remote side of the engine: paginated, rate-limited extraction.
//!
//! [`RemoteSource`] is one call against the external platform.
//! [`RemoteExtractor`] turns page calls into a lazy record stream, retrying
//! rate limits and transient failures with exponential backoff and
//! refreshing credentials at most once per extraction.

use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::models::{Fields, RemoteRecord};

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("Rate limited by remote")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Remote credentials expired")]
    AuthExpired,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Remote returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Unexpected remote response: {0}")]
    Decode(String),
    #[error("Remote not configured: {0}")]
    NotConfigured(String),
}

impl RemoteError {
    /// Failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::RateLimited { .. } | RemoteError::Transport(_) => true,
            RemoteError::Api { status, .. } => matches!(status, 408 | 500..=599),
            RemoteError::AuthExpired | RemoteError::Decode(_) | RemoteError::NotConfigured(_) => {
                false
            }
        }
    }
}

/// A whole extraction failed; the run that requested it stops.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: RemoteError },
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    #[error(transparent)]
    Remote(RemoteError),
}

/// One page of remote records.
#[derive(Debug, Clone, Default)]
pub struct RemotePage {
    pub records: Vec<RemoteRecord>,
    /// Cursor for the following page; `None` when the list is exhausted.
    pub next_cursor: Option<String>,
}

/// Calls against the external system of record.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_page(&self, module: &str, cursor: Option<&str>) -> Result<RemotePage, RemoteError>;

    /// Exchanges the refresh token for a new access token.
    async fn refresh_credentials(&self) -> Result<(), RemoteError>;

    /// Creates (`id = None`) or updates a remote record.
    async fn upsert(&self, module: &str, id: Option<&str>, fields: &Fields) -> Result<(), RemoteError>;

    /// Image bytes attached to a record, if it has one.
    async fn fetch_image(&self, module: &str, id: &str) -> Result<Option<Vec<u8>>, RemoteError>;
}

/// Retry limits for one extraction.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Exponential delay with up to 20% jitter for the given attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.base_backoff.as_millis() as u64;
        let backoff = base
            .saturating_mul(1_u64 << exp)
            .min(self.max_backoff.as_millis() as u64);
        let jitter = rand::rng().random_range(0..=(backoff / 5).max(1));
        Duration::from_millis(backoff.saturating_add(jitter))
    }
}

struct PageState {
    cursor: Option<String>,
    done: bool,
    refreshed: bool,
}

/// Lazy, restartable reader of every record in a remote module.
pub struct RemoteExtractor<'a> {
    source: &'a dyn RemoteSource,
    policy: RetryPolicy,
}

impl<'a> RemoteExtractor<'a> {
    pub fn new(source: &'a dyn RemoteSource, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Streams every record of `module` from the first page.
    pub fn fetch_all(
        &self,
        module: &'a str,
    ) -> impl Stream<Item = Result<RemoteRecord, ExtractError>> + 'a {
        self.fetch_from(module, None)
    }

    /// Streams records starting at `cursor`. Each call starts a fresh
    /// extraction with its own credential-refresh allowance.
    pub fn fetch_from(
        &self,
        module: &'a str,
        cursor: Option<String>,
    ) -> impl Stream<Item = Result<RemoteRecord, ExtractError>> + 'a {
        let source = self.source;
        let policy = self.policy;
        let state = PageState {
            cursor,
            done: false,
            refreshed: false,
        };

        stream::try_unfold(state, move |mut state| async move {
            if state.done {
                return Ok(None);
            }
            let page = fetch_page_with_retry(source, &policy, module, &mut state).await?;
            debug!(
                "Fetched {} {} record(s), more pages: {}",
                page.records.len(),
                module,
                page.next_cursor.is_some()
            );
            state.done = page.next_cursor.is_none();
            state.cursor = page.next_cursor;
            Ok(Some((page.records, state)))
        })
        .map_ok(|records| stream::iter(records.into_iter().map(Ok::<_, ExtractError>)))
        .try_flatten()
    }
}

async fn fetch_page_with_retry(
    source: &dyn RemoteSource,
    policy: &RetryPolicy,
    module: &str,
    state: &mut PageState,
) -> Result<RemotePage, ExtractError> {
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);
        match source.fetch_page(module, state.cursor.as_deref()).await {
            Ok(page) => return Ok(page),
            Err(RemoteError::AuthExpired) => {
                if state.refreshed {
                    return Err(ExtractError::AuthFailed(
                        "credentials rejected after refresh".to_string(),
                    ));
                }
                state.refreshed = true;
                warn!("Access token expired while reading {}, refreshing", module);
                source
                    .refresh_credentials()
                    .await
                    .map_err(|e| ExtractError::AuthFailed(e.to_string()))?;
                // The refreshed retry is not counted against the backoff budget
                attempt = attempt.saturating_sub(1);
            }
            Err(err) if err.is_transient() => {
                if attempt > policy.max_retries {
                    return Err(ExtractError::RetriesExhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                let mut delay = policy.backoff(attempt);
                if let RemoteError::RateLimited {
                    retry_after: Some(after),
                } = &err
                {
                    delay = delay.max(*after);
                }
                warn!(
                    "Retry {}/{} for {} page {:?} in {:?}: {}",
                    attempt,
                    policy.max_retries,
                    module,
                    state.cursor,
                    delay,
                    err
                );
                sleep(delay).await;
            }
            Err(err) => return Err(ExtractError::Remote(err)),
        }
    }
}
