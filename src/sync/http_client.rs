//! HTTP client for a Books-style REST API.
//!
//! Lists are paged with `page`/`per_page` query parameters and report
//! `page_context.has_more_page`. Requests carry an OAuth access token that
//! is exchanged for a new one with the refresh token when it expires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::remote::{RemoteError, RemotePage, RemoteSource};
use crate::config::RemoteConfig;
use crate::models::{Fields, RemoteRecord};

/// Record field carrying the last-modified time.
const MODIFIED_FIELD: &str = "last_modified_time";

#[derive(Debug, Deserialize)]
struct PageContext {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    has_more_page: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
struct RefreshCredentials {
    accounts_url: String,
    refresh_token: String,
    client_id: String,
    client_secret: String,
}

/// [`RemoteSource`] backed by the platform's REST API.
pub struct HttpRemote {
    client: Client,
    base_url: String,
    organization_id: String,
    page_size: u32,
    access_token: RwLock<String>,
    refresh: Option<RefreshCredentials>,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("organization_id", &self.organization_id)
            .field("page_size", &self.page_size)
            .field("access_token", &"<redacted>")
            .field("can_refresh", &self.refresh.is_some())
            .finish()
    }
}

impl HttpRemote {
    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let missing = |name: &str| RemoteError::NotConfigured(format!("remote.{} is not set", name));
        let base_url = config.base_url.clone().ok_or_else(|| missing("base_url"))?;
        let organization_id = config
            .organization_id
            .clone()
            .ok_or_else(|| missing("organization_id"))?;
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| missing("access_token"))?;

        let refresh = match (
            &config.accounts_url,
            &config.refresh_token,
            &config.client_id,
            &config.client_secret,
        ) {
            (Some(accounts_url), Some(refresh_token), Some(client_id), Some(client_secret)) => {
                Some(RefreshCredentials {
                    accounts_url: accounts_url.trim_end_matches('/').to_string(),
                    refresh_token: refresh_token.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                })
            }
            _ => None,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization_id,
            page_size: config.page_size.max(1),
            access_token: RwLock::new(access_token),
            refresh,
        })
    }

    fn url(&self, module: &str, id: Option<&str>, suffix: Option<&str>) -> String {
        let mut url = format!("{}/{}", self.base_url, urlencoding::encode(module));
        if let Some(id) = id {
            url.push('/');
            url.push_str(&urlencoding::encode(id));
        }
        if let Some(suffix) = suffix {
            url.push('/');
            url.push_str(suffix);
        }
        url
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let token = self.access_token.read().await.clone();
        request
            .header(header::AUTHORIZATION, format!("Zoho-oauthtoken {}", token))
            .query(&[("organization_id", self.organization_id.as_str())])
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }
}

/// Maps non-success responses onto the retry taxonomy.
async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(RemoteError::AuthExpired),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(RemoteError::RateLimited { retry_after })
        }
        _ => {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body["message"]
                .as_str()
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
                .to_string();
            Err(RemoteError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn parse_modified(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn to_record(value: Value) -> Result<RemoteRecord, RemoteError> {
    let Value::Object(fields) = value else {
        return Err(RemoteError::Decode("record is not an object".to_string()));
    };
    let modified_at = fields.get(MODIFIED_FIELD).and_then(parse_modified);
    let mut record = RemoteRecord::new(fields);
    record.modified_at = modified_at;
    Ok(record)
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn fetch_page(&self, module: &str, cursor: Option<&str>) -> Result<RemotePage, RemoteError> {
        let page = match cursor {
            Some(c) => c
                .parse::<u32>()
                .map_err(|_| RemoteError::Decode(format!("invalid page cursor '{}'", c)))?,
            None => 1,
        };

        let request = self.client.get(self.url(module, None, None)).query(&[
            ("page", page.to_string()),
            ("per_page", self.page_size.to_string()),
        ]);
        let response = check_status(self.authorized(request).await?).await?;
        let mut body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        let records = match body.get_mut(module).map(Value::take) {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(to_record)
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(RemoteError::Decode(format!(
                    "response has no '{}' list",
                    module
                )))
            }
        };

        let context: Option<PageContext> = body
            .get("page_context")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        let next_cursor = context
            .filter(|c| c.has_more_page)
            .map(|c| (c.page.unwrap_or(page) + 1).to_string());

        debug!("GET {} page {}: {} records", module, page, records.len());
        Ok(RemotePage {
            records,
            next_cursor,
        })
    }

    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        let creds = self.refresh.as_ref().ok_or_else(|| {
            RemoteError::NotConfigured("refresh credentials are not set".to_string())
        })?;

        let response = self
            .client
            .post(format!("{}/oauth/v2/token", creds.accounts_url))
            .query(&[
                ("refresh_token", creds.refresh_token.as_str()),
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = response.status();
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        match body.access_token {
            Some(token) if status.is_success() => {
                *self.access_token.write().await = token;
                info!("Refreshed remote access token");
                Ok(())
            }
            _ => Err(RemoteError::Api {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| "token refresh rejected".to_string()),
            }),
        }
    }

    async fn upsert(&self, module: &str, id: Option<&str>, fields: &Fields) -> Result<(), RemoteError> {
        let request = match id {
            Some(id) => self.client.put(self.url(module, Some(id), None)),
            None => self.client.post(self.url(module, None, None)),
        };
        check_status(self.authorized(request.json(fields)).await?).await?;
        Ok(())
    }

    async fn fetch_image(&self, module: &str, id: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let request = self.client.get(self.url(module, Some(id), Some("image")));
        let response = self.authorized(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }
}
