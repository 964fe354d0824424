//! Routes
//!
//! - `GET /health`: health check (no auth required)
//! - `GET /mappings`: every entity mapping
//! - `GET /mappings/{entity}` / `PUT /mappings/{entity}`: read or edit one mapping
//! - `POST /sync/{entity}/analyze`: run an analysis pass
//! - `POST /sync/{entity}/execute`: run a full sync
//! - `GET /sync/{entity}/compare`: latest comparison (`?refresh=true` for a new pass)
//! - `GET /sync/{entity}/status`: counters and scheduling state
//! - `GET /sync/{entity}/runs`: recent runs (`?limit=N`)

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::models::{EntityMapping, EntityType, MappingUpdate};
use crate::sync::{EngineError, MappingError, SyncEngine};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    api_keys: Arc<HashSet<String>>,
}

impl AppState {
    /// An empty key list leaves the API open.
    pub fn new(engine: Arc<SyncEngine>, api_keys: Vec<String>) -> Self {
        Self {
            engine,
            api_keys: Arc::new(api_keys.into_iter().collect()),
        }
    }
}

/// Error body shared by every route: `{ status: "error", error, message }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "status": "error",
                "error": self.error,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::Disabled(_) => Self::new(StatusCode::CONFLICT, "mapping_disabled", message),
            EngineError::AlreadyRunning(_) => {
                Self::new(StatusCode::CONFLICT, "already_running", message)
            }
            EngineError::Mapping(MappingError::NotFound(_)) => {
                Self::new(StatusCode::NOT_FOUND, "not_found", message)
            }
            EngineError::Mapping(MappingError::Validation(_)) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "validation", message)
            }
            EngineError::Extract(_) => Self::new(StatusCode::BAD_GATEWAY, "remote_failure", message),
            EngineError::Mapping(MappingError::Storage(_))
            | EngineError::Local(_)
            | EngineError::Storage(_) => {
                tracing::error!("Storage failure: {}", message);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage", message)
            }
        }
    }
}

fn parse_entity(raw: &str) -> Result<EntityType, ApiError> {
    raw.parse()
        .map_err(|e: String| ApiError::new(StatusCode::NOT_FOUND, "unknown_entity", e))
}

/// Authentication middleware
async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.api_keys.is_empty() {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        Some(_) => {
            return ApiError::new(
                StatusCode::UNAUTHORIZED,
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            )
            .into_response();
        }
        None => {
            return ApiError::new(
                StatusCode::UNAUTHORIZED,
                "missing_auth",
                "Authorization header required",
            )
            .into_response();
        }
    };

    if state.api_keys.contains(api_key) {
        next.run(request).await
    } else {
        ApiError::new(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key").into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct MappingsResponse {
    mappings: BTreeMap<EntityType, EntityMapping>,
}

async fn list_mappings(State(state): State<AppState>) -> Result<Json<MappingsResponse>, ApiError> {
    let mappings = state
        .engine
        .mappings()
        .await?
        .into_iter()
        .map(|m| (m.entity_type, m))
        .collect();
    Ok(Json(MappingsResponse { mappings }))
}

async fn get_mapping(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<EntityMapping>, ApiError> {
    let entity_type = parse_entity(&entity)?;
    Ok(Json(state.engine.mapping(entity_type).await?))
}

async fn update_mapping(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<EntityMapping>, ApiError> {
    let entity_type = parse_entity(&entity)?;
    let Json(body) = body.map_err(|e| {
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "validation", e.body_text())
    })?;
    let update = MappingUpdate::from_json(body)
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "validation", e))?;

    Ok(Json(state.engine.update_mapping(entity_type, &update).await?))
}

async fn analyze(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let analysis = state.engine.analyze(parse_entity(&entity)?).await?;
    Ok(Json(json!({ "status": "success", "analysis": analysis })))
}

async fn execute(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run = state.engine.execute(parse_entity(&entity)?).await?;
    Ok(Json(json!({ "status": "success", "run": run })))
}

#[derive(Debug, Deserialize)]
struct CompareQuery {
    #[serde(default)]
    refresh: bool,
}

async fn compare(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<Value>, ApiError> {
    let comparison = state
        .engine
        .compare(parse_entity(&entity)?, query.refresh)
        .await?;
    Ok(Json(json!({ "status": "success", "comparison": comparison })))
}

async fn status(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let sync_status = state.engine.status(parse_entity(&entity)?).await?;
    Ok(Json(json!({ "status": "success", "sync_status": sync_status })))
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<i64>,
}

async fn runs(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let runs = state.engine.runs(parse_entity(&entity)?, limit).await?;
    Ok(Json(json!({ "status": "success", "runs": runs })))
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required when keys are configured)
    let protected_routes = Router::new()
        .route("/mappings", get(list_mappings))
        .route("/mappings/{entity}", get(get_mapping).put(update_mapping))
        .route("/sync/{entity}/analyze", post(analyze))
        .route("/sync/{entity}/execute", post(execute))
        .route("/sync/{entity}/compare", get(compare))
        .route("/sync/{entity}/status", get(status))
        .route("/sync/{entity}/runs", get(runs))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_pool;
    use crate::db::{LocalRecordRepository, MappingRepository, SyncRunRepository};
    use crate::sync::testing::{remote_record, FakeRemote};
    use crate::sync::{AssetStore, MappingRegistry, RemoteError, RetryPolicy};
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        remote: Arc<FakeRemote>,
        _db: TempDir,
        _assets: TempDir,
    }

    async fn app(api_keys: Vec<String>) -> TestApp {
        let (pool, db) = temp_pool().await;
        let assets = TempDir::new().unwrap();
        let registry = MappingRegistry::new(MappingRepository::new(pool.clone()));
        registry.seed_defaults().await.unwrap();

        let remote = Arc::new(FakeRemote::new());
        remote.set_records(
            "items",
            vec![remote_record("1", "Widget", 10), remote_record("2", "Gadget", 20)],
        );
        let engine = Arc::new(SyncEngine::new(
            registry,
            Arc::new(LocalRecordRepository::new(pool.clone())),
            remote.clone(),
            SyncRunRepository::new(pool),
            AssetStore::new(assets.path()),
            RetryPolicy {
                max_retries: 1,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
        ));

        TestApp {
            router: router(AppState::new(engine, api_keys)),
            remote,
            _db: db,
            _assets: assets,
        }
    }

    async fn send(router: &Router, request: HttpRequest<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_req(uri: &str) -> HttpRequest<Body> {
        HttpRequest::get(uri).body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str) -> HttpRequest<Body> {
        HttpRequest::post(uri).body(Body::empty()).unwrap()
    }

    fn put_json(uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::put(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_mappings() {
        let app = app(Vec::new()).await;

        let (status, body) = send(&app.router, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app.router, get_req("/mappings")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mappings"]["item"]["remote_module"], "items");
        assert_eq!(body["mappings"]["customer"]["local_table"], "customers");
        assert_eq!(body["mappings"]["vendor"]["sync_direction"], "remote_to_local");
    }

    #[tokio::test]
    async fn test_update_mapping_validation() {
        let app = app(Vec::new()).await;

        let (status, body) = send(
            &app.router,
            put_json("/mappings/item", json!({"sync_mode": "hourly"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "validation");

        let (status, _) = send(
            &app.router,
            put_json(
                "/mappings/item",
                json!({"sync_mode": "scheduled", "sync_frequency_minutes": 0}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(
            &app.router,
            put_json(
                "/mappings/item",
                json!({"sync_mode": "scheduled", "sync_frequency_minutes": 30}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sync_mode"], "scheduled");
        assert_eq!(body["version"], 2);

        let (status, body) = send(&app.router, put_json("/mappings/widgets", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_entity");
    }

    #[tokio::test]
    async fn test_analyze_execute_status_flow() {
        let app = app(Vec::new()).await;

        let (status, body) = send(&app.router, post_req("/sync/item/analyze")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["analysis"]["new_records"], 2);

        let (_, body) = send(&app.router, get_req("/sync/item/compare")).await;
        assert_eq!(body["comparison"]["remote_only"], 2);
        assert_eq!(body["comparison"]["ready_to_sync"], 2);

        let (status, body) = send(&app.router, post_req("/sync/items/execute")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["run"]["created"], 2);

        let (_, body) = send(&app.router, get_req("/sync/item/status")).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["sync_status"]["total_synced"], 2);
        assert_eq!(body["sync_status"]["total_errors"], 0);
        assert_eq!(body["sync_status"]["state"], "idle");

        let (_, body) = send(&app.router, get_req("/sync/item/runs?limit=5")).await;
        assert_eq!(body["runs"].as_array().unwrap().len(), 1);
        assert_eq!(body["runs"][0]["state"], "completed");
    }

    #[tokio::test]
    async fn test_disabled_mapping_conflict() {
        let app = app(Vec::new()).await;
        send(&app.router, put_json("/mappings/item", json!({"enabled": false}))).await;

        let (status, body) = send(&app.router, post_req("/sync/item/execute")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "mapping_disabled");
        assert!(body["message"].as_str().unwrap().contains("mapping disabled"));
    }

    #[tokio::test]
    async fn test_remote_failure_is_bad_gateway() {
        let app = app(Vec::new()).await;
        app.remote.fail_page_call(1, RemoteError::AuthExpired);
        app.remote.fail_page_call(2, RemoteError::AuthExpired);

        let (status, body) = send(&app.router, post_req("/sync/item/execute")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "remote_failure");

        let (_, body) = send(&app.router, get_req("/sync/item/status")).await;
        assert_eq!(body["sync_status"]["total_synced"], 0);
    }

    #[tokio::test]
    async fn test_auth_required_when_keys_configured() {
        let app = app(vec!["secret".to_string()]).await;

        let (status, _) = send(&app.router, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app.router, get_req("/mappings")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing_auth");

        let request = HttpRequest::get("/mappings")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = HttpRequest::get("/mappings")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
    }
}
