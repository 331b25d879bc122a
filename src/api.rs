//! # HTTP API
//!
//! Builds the axum router that exposes the metadata service to namenodes.
//! Every request runs on a blocking worker with its own [`Context`]; the
//! context is cancelled if the client goes away before the worker finishes.
//!
//! ## Endpoints
//!
//! | Method              | Path                                          | Description                  |
//! |---------------------|-----------------------------------------------|------------------------------|
//! | GET                 | `/health`                                     | Liveness probe               |
//! | GET                 | `/api/tso?count=N`                            | Timestamps                   |
//! | GET/PUT/DELETE      | `/api/block/meta/:id`                         | Block attributes             |
//! | GET                 | `/api/block/storage/:id`                      | Replica set                  |
//! | PUT/DELETE          | `/api/block/storage/:id/:data_node_id/:storage_id` | Add / remove a replica  |
//! | GET/PUT/POST/DELETE | `/api/file/:id`                               | File (`?simple` skips blocks)|
//! | GET/PUT/POST/DELETE | `/api/file/:id/:block_id`                     | Block in a file's chain      |
//! | PUT                 | `/api/file-truncate/:id/:size`                | Truncate                     |
//! | GET/PUT/POST/DELETE | `/api/directory/:id`                          | Directory                    |
//! | GET/PUT/DELETE      | `/api/directory/:id/:name`                    | Child link                   |
//! | GET                 | `/api/directory-children/:id`                 | Children (`?simple`)         |
//! | PUT                 | `/api/inode/:id/:old_id/:new_id`              | Move between directories     |
//!
//! Responses use one envelope: `{code, error, response?}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::context::Context;
use crate::error::{ErrorKind, MetaError};
use crate::model::{Block, BlockMeta, INode, INodeFile, StorageLocation};
use crate::service::MetaService;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state available to all request handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MetaService>,

    /// Deadline applied to each request's context
    pub request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(service: Arc<MetaService>, request_timeout: Option<Duration>) -> Self {
        Self {
            service,
            request_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full router with all API routes and request tracing
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/tso", get(tso_handler))
        .route(
            "/block/meta/:id",
            get(get_block_handler)
                .put(put_block_handler)
                .delete(delete_block_handler),
        )
        .route("/block/storage/:id", get(get_block_storage_handler))
        .route(
            "/block/storage/:id/:data_node_id/:storage_id",
            put(put_block_storage_handler).delete(delete_block_storage_handler),
        )
        .route(
            "/file/:id",
            get(get_file_handler)
                .put(put_file_handler)
                .post(update_file_handler)
                .delete(delete_file_handler),
        )
        .route(
            "/file/:id/:block_id",
            get(get_file_block_handler)
                .put(put_file_block_handler)
                .post(update_file_block_handler)
                .delete(delete_file_block_handler),
        )
        .route("/file-truncate/:id/:size", put(truncate_file_handler))
        .route(
            "/directory/:id",
            get(get_directory_handler)
                .put(put_directory_handler)
                .post(update_directory_handler)
                .delete(delete_directory_handler),
        )
        .route(
            "/directory/:id/:name",
            get(get_child_handler)
                .put(put_child_handler)
                .delete(delete_child_handler),
        )
        .route("/directory-children/:id", get(list_children_handler))
        .route("/inode/:id/:old_id/:new_id", put(reparent_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), availability_guard));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Rejects `/api` requests once the service is closing
async fn availability_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.service.is_available() {
        return ApiError::from(MetaError::Unavailable).into_response();
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Envelope & Errors
// ---------------------------------------------------------------------------

/// Body of every API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<T>,
}

/// Success without payload: 202
fn accepted() -> Response {
    let body: ApiResponse<()> = ApiResponse {
        code: 0,
        error: "success".to_string(),
        response: None,
    };
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

/// Success with payload: 200
fn ok<T: Serialize>(payload: T) -> Response {
    let body = ApiResponse {
        code: 0,
        error: "success".to_string(),
        response: Some(payload),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<MetaError> for ApiError {
    fn from(err: MetaError) -> Self {
        let status = status_for(err.kind());
        if status.is_server_error() {
            tracing::warn!(error = %err, status = status.as_u16(), "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body: ApiResponse<()> = ApiResponse {
            code: i32::from(self.status.as_u16()),
            error: self.message,
            response: None,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

// ---------------------------------------------------------------------------
// Request Helpers
// ---------------------------------------------------------------------------

/// Parse a path id; it must be a positive integer
fn parse_id(field: &str, raw: &str) -> Result<i64, ApiError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        Ok(_) => Err(ApiError::bad_request(format!("{:?} must be a positive integer", field))),
        Err(e) => Err(ApiError::bad_request(format!("{:?} param format error: {}", field, e))),
    }
}

fn parse_non_negative(field: &str, raw: &str) -> Result<i64, ApiError> {
    match raw.parse::<i64>() {
        Ok(n) if n >= 0 => Ok(n),
        Ok(_) => Err(ApiError::bad_request(format!("{:?} must not be negative", field))),
        Err(e) => Err(ApiError::bad_request(format!("{:?} param format error: {}", field, e))),
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("parse request body error: {}", e)))
}

fn is_simple(query: &HashMap<String, String>) -> bool {
    query.contains_key("simple")
}

/// Run `f` on a blocking worker under a fresh request context
///
/// Dropping the returned future (client disconnect) cancels the context.
async fn run<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&MetaService, &Context) -> crate::Result<T> + Send + 'static,
{
    let ctx = Context::with_optional_timeout(state.request_timeout);
    let guard = ctx.cancel_on_drop();
    let service = state.service.clone();

    let joined = tokio::task::spawn_blocking(move || f(&service, &ctx)).await;
    guard.disarm();

    let result = joined.map_err(|e| MetaError::Storage(format!("request worker failed: {}", e)))?;
    Ok(result?)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "available": state.service.is_available(),
    }))
}

/// `GET /api/tso?count=N`
async fn tso_handler(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> ApiResult {
    let count = match query.get("count") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|e| ApiError::bad_request(format!("\"count\" param format error: {}", e)))?,
        None => 1,
    };
    let timestamps = run(&state, move |service, _| service.timestamps(count)).await?;
    Ok(ok(timestamps))
}

async fn get_block_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id("id", &id)?;
    let block = run(&state, move |service, ctx| service.get_block(ctx, id)).await?;
    Ok(ok(block))
}

async fn put_block_handler(State(state): State<AppState>, Path(id): Path<String>, body: Bytes) -> ApiResult {
    let id = parse_id("id", &id)?;
    let meta: BlockMeta = parse_body(&body)?;
    run(&state, move |service, ctx| service.put_block_meta(ctx, id, meta)).await?;
    Ok(accepted())
}

async fn delete_block_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id("id", &id)?;
    run(&state, move |service, ctx| service.delete_block_meta(ctx, id)).await?;
    Ok(accepted())
}

async fn get_block_storage_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id("id", &id)?;
    let storage = run(&state, move |service, ctx| service.get_block_storage(ctx, id)).await?;
    Ok(ok(storage))
}

async fn put_block_storage_handler(
    State(state): State<AppState>,
    Path((id, data_node_id, storage_id)): Path<(String, String, String)>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let location = StorageLocation::new(data_node_id, storage_id);
    run(&state, move |service, ctx| service.add_block_storage(ctx, id, location)).await?;
    Ok(accepted())
}

async fn delete_block_storage_handler(
    State(state): State<AppState>,
    Path((id, data_node_id, storage_id)): Path<(String, String, String)>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let location = StorageLocation::new(data_node_id, storage_id);
    run(&state, move |service, ctx| service.remove_block_storage(ctx, id, location)).await?;
    Ok(accepted())
}

async fn get_file_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let simple = is_simple(&query);
    let file = run(&state, move |service, ctx| service.get_file(ctx, id, simple)).await?;
    Ok(ok(file))
}

async fn put_file_handler(State(state): State<AppState>, Path(id): Path<String>, body: Bytes) -> ApiResult {
    let id = parse_id("id", &id)?;
    let node: INode = parse_body(&body)?;
    run(&state, move |service, ctx| service.put_file(ctx, id, node)).await?;
    Ok(accepted())
}

async fn update_file_handler(State(state): State<AppState>, Path(id): Path<String>, body: Bytes) -> ApiResult {
    let id = parse_id("id", &id)?;
    let file: INodeFile = parse_body(&body)?;
    run(&state, move |service, ctx| service.update_file(ctx, id, file)).await?;
    Ok(accepted())
}

async fn delete_file_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id("id", &id)?;
    run(&state, move |service, ctx| service.delete_file(ctx, id)).await?;
    Ok(accepted())
}

async fn get_file_block_handler(
    State(state): State<AppState>,
    Path((id, block_id)): Path<(String, String)>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let block_id = parse_id("block_id", &block_id)?;
    let block = run(&state, move |service, ctx| service.get_file_block(ctx, id, block_id)).await?;
    Ok(ok(block))
}

async fn put_file_block_handler(
    State(state): State<AppState>,
    Path((id, block_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let block_id = parse_id("block_id", &block_id)?;
    let generation = match query.get("generation_time") {
        Some(raw) => parse_non_negative("generation_time", raw)?,
        None => 0,
    };
    run(&state, move |service, ctx| service.put_file_block(ctx, id, block_id, generation)).await?;
    Ok(accepted())
}

async fn update_file_block_handler(
    State(state): State<AppState>,
    Path((id, block_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let block_id = parse_id("block_id", &block_id)?;
    let mut block: Block = parse_body(&body)?;
    if block.replication == 0 {
        block.replication = 1;
    }
    let stored = run(&state, move |service, ctx| service.update_file_block(ctx, id, block_id, block)).await?;
    Ok(ok(stored))
}

async fn delete_file_block_handler(
    State(state): State<AppState>,
    Path((id, block_id)): Path<(String, String)>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let block_id = parse_id("block_id", &block_id)?;
    run(&state, move |service, ctx| service.delete_file_block(ctx, id, block_id)).await?;
    Ok(accepted())
}

async fn truncate_file_handler(
    State(state): State<AppState>,
    Path((id, size)): Path<(String, String)>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let size = parse_non_negative("size", &size)?;
    run(&state, move |service, ctx| service.truncate_file(ctx, id, size)).await?;
    Ok(accepted())
}

async fn get_directory_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id("id", &id)?;
    let directory = run(&state, move |service, ctx| service.get_directory(ctx, id)).await?;
    Ok(ok(directory))
}

async fn put_directory_handler(State(state): State<AppState>, Path(id): Path<String>, body: Bytes) -> ApiResult {
    let id = parse_id("id", &id)?;
    let node: INode = parse_body(&body)?;
    run(&state, move |service, ctx| service.put_directory(ctx, id, node)).await?;
    Ok(accepted())
}

async fn update_directory_handler(State(state): State<AppState>, Path(id): Path<String>, body: Bytes) -> ApiResult {
    let id = parse_id("id", &id)?;
    let node: INode = parse_body(&body)?;
    run(&state, move |service, ctx| service.update_directory(ctx, id, node)).await?;
    Ok(accepted())
}

async fn delete_directory_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id("id", &id)?;
    run(&state, move |service, ctx| service.delete_directory(ctx, id)).await?;
    Ok(accepted())
}

async fn get_child_handler(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let child = run(&state, move |service, ctx| service.get_child(ctx, id, &name)).await?;
    Ok(ok(child))
}

async fn put_child_handler(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let node: INode = parse_body(&body)?;
    run(&state, move |service, ctx| service.put_child(ctx, id, &name, node)).await?;
    Ok(accepted())
}

async fn delete_child_handler(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    run(&state, move |service, ctx| service.delete_child(ctx, id, &name)).await?;
    Ok(accepted())
}

async fn list_children_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let simple = is_simple(&query);
    let children = run(&state, move |service, ctx| service.list_children(ctx, id, simple)).await?;
    Ok(ok(children))
}

async fn reparent_handler(
    State(state): State<AppState>,
    Path((id, old_id, new_id)): Path<(String, String, String)>,
) -> ApiResult {
    let id = parse_id("id", &id)?;
    let old_parent = parse_id("old_id", &old_id)?;
    let new_parent = parse_id("new_id", &new_id)?;
    run(&state, move |service, ctx| service.reparent(ctx, id, old_parent, new_parent)).await?;
    Ok(accepted())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
