//! HTTP server for the chat front end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/sync-gcs`, `/sync` | Reconcile the index with the source |
//! | `POST` | `/chat` | One turn, streamed as `text/plain` fragments |
//! | `POST` | `/chat-simple` | One turn as `{response, complete, evidence}` once complete |
//! | `GET`  | `/sessions` | List sessions, most recently updated first |
//! | `POST` | `/sessions` | Create a session (optional `title`) |
//! | `GET`  | `/sessions/{id}` | A session and its messages |
//! | `PUT`  | `/sessions/{id}` | Rename a session |
//! | `DELETE` | `/sessions/{id}` | Delete a session and its messages |
//! | `GET`  | `/documents`, `/rcas` | List indexed documents with their summaries |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "problem_description must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `sync_in_progress` (409),
//! `internal` (500).
//!
//! A `/chat` request that fails mid-stream still returns 200: the body ends
//! with a short notice instead of provider error text. Closing the
//! connection cancels the turn; what was sent so far is kept in the
//! session history.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use rca_harness_core::error::SyncError;
use rca_harness_core::models::Document;

use crate::chat::{ChatEvent, ChatReply};
use crate::indexer::SyncReport;
use crate::runtime::Runtime;
use crate::sessions::{SessionInfo, StoredMessage};

/// Bind the configured address and serve until the process exits.
pub async fn run_server(runtime: Arc<Runtime>) -> anyhow::Result<()> {
    let bind_addr = runtime.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    serve(listener, runtime).await
}

/// Serve on an already bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    runtime: Arc<Runtime>,
) -> anyhow::Result<()> {
    let app = router(runtime)?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(runtime: Arc<Runtime>) -> anyhow::Result<Router> {
    let cors = cors_layer(&runtime.config.server.allowed_origins)?;
    Ok(Router::new()
        .route("/sync-gcs", post(handle_sync))
        .route("/sync", post(handle_sync))
        .route("/chat", post(handle_chat))
        .route("/chat-simple", post(handle_chat_simple))
        .route("/sessions", get(handle_list_sessions).post(handle_create_session))
        .route(
            "/sessions/{id}",
            get(handle_get_session)
                .put(handle_rename_session)
                .delete(handle_delete_session),
        )
        .route("/documents", get(handle_documents))
        .route("/rcas", get(handle_documents))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(runtime))
}

fn cors_layer(allowed_origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| anyhow::anyhow!("invalid server.allowed_origins entry: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "internal error".to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

// ============ POST /sync-gcs ============

#[derive(Serialize)]
struct SyncResponse {
    status: &'static str,
    stats: SyncReport,
}

async fn handle_sync(State(rt): State<Arc<Runtime>>) -> Result<Json<SyncResponse>, AppError> {
    match rt.indexer.sync().await {
        Ok(stats) => Ok(Json(SyncResponse {
            status: "Sync completed successfully",
            stats,
        })),
        Err(SyncError::InProgress) => Err(AppError {
            status: StatusCode::CONFLICT,
            code: "sync_in_progress",
            message: "a sync run is already in progress".to_string(),
        }),
        Err(e) => Err(anyhow::Error::new(e).into()),
    }
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    session_id: String,
    problem_description: String,
}

impl ChatRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.session_id.trim().is_empty() {
            return Err(bad_request("session_id must not be empty"));
        }
        if self.problem_description.trim().is_empty() {
            return Err(bad_request("problem_description must not be empty"));
        }
        Ok(())
    }
}

async fn handle_chat(
    State(rt): State<Arc<Runtime>>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    req.validate()?;
    let turn = rt.chat.start_turn(
        &req.session_id,
        &req.problem_description,
        CancellationToken::new(),
    );
    let fragments = turn
        .filter(|event| std::future::ready(!matches!(event, ChatEvent::Evidence(_))))
        .map(|event| Ok::<_, Infallible>(Bytes::from(event.into_text())));
    let content_type = [(header::CONTENT_TYPE, "text/plain; charset=utf-8")];
    Ok((content_type, Body::from_stream(fragments)).into_response())
}

async fn handle_chat_simple(
    State(rt): State<Arc<Runtime>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    req.validate()?;
    let turn = rt.chat.start_turn(
        &req.session_id,
        &req.problem_description,
        CancellationToken::new(),
    );
    let reply = turn.collect_reply().await;
    Ok(Json(reply))
}

// ============ Sessions ============

async fn handle_list_sessions(
    State(rt): State<Arc<Runtime>>,
) -> Result<Json<Vec<SessionInfo>>, AppError> {
    Ok(Json(rt.sessions.list_sessions().await?))
}

#[derive(Deserialize, Default)]
struct CreateSessionRequest {
    title: Option<String>,
}

/// The body is optional; an empty body creates a session with the default title.
async fn handle_create_session(
    State(rt): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionInfo>), AppError> {
    let req: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };
    let title = req.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let session = rt.sessions.create_session(title).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Serialize)]
struct SessionDetail {
    session: SessionInfo,
    messages: Vec<StoredMessage>,
}

async fn handle_get_session(
    State(rt): State<Arc<Runtime>>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, AppError> {
    let session = rt
        .sessions
        .get_session(&id)
        .await?
        .ok_or_else(|| not_found(format!("session not found: {}", id)))?;
    let messages = rt.sessions.messages(&id).await?;
    Ok(Json(SessionDetail { session, messages }))
}

#[derive(Deserialize)]
struct RenameSessionRequest {
    title: String,
}

async fn handle_rename_session(
    State(rt): State<Arc<Runtime>>,
    Path(id): Path<String>,
    Json(req): Json<RenameSessionRequest>,
) -> Result<StatusCode, AppError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(bad_request("title must not be empty"));
    }
    if !rt.sessions.rename_session(&id, title).await? {
        return Err(not_found(format!("session not found: {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_delete_session(
    State(rt): State<Arc<Runtime>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if !rt.sessions.delete_session(&id).await? {
        return Err(not_found(format!("session not found: {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ GET /documents ============

async fn handle_documents(
    State(rt): State<Arc<Runtime>>,
) -> Result<Json<Vec<Document>>, AppError> {
    Ok(Json(rt.index.documents().await?))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
