//! HTTP boundary for the sync protocol.
//!
//! ```text
//! GET  /lists/{list_id}/collaborative/full-state -> {state, stateVector}
//! POST /lists/{list_id}/collaborative/sync       <- {stateVector, update?}
//!                                                 -> {update|null, stateVector}
//! ```
//!
//! Binary payloads are Base64 inside JSON. Every failure answers with a JSON
//! `{error}` body.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tasksync_core::protocol::ErrorBody;
use tasksync_core::{FullStateResponse, SyncRequest, SyncResponse};
use tracing::{error, info};

use crate::config::{ServerConfig, DEFAULT_PRINCIPAL_HEADER};
use crate::error::SyncError;
use crate::handler::SyncHandler;

/// Resolves the calling principal from request headers.
///
/// Sessions are issued elsewhere; this only reads the identity the upstream
/// layer already established.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Option<String>;
}

/// Trusts a principal id header set by an upstream identity proxy.
#[derive(Clone, Debug)]
pub struct HeaderAuthenticator {
    header: String,
}

impl HeaderAuthenticator {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Default for HeaderAuthenticator {
    fn default() -> Self {
        Self::new(DEFAULT_PRINCIPAL_HEADER)
    }
}

impl Authenticator for HeaderAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

#[derive(Clone)]
struct AppState {
    handler: Arc<SyncHandler>,
    auth: Arc<dyn Authenticator>,
}

impl AppState {
    fn principal(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        self.auth
            .authenticate(headers)
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Failure of one HTTP request.
#[derive(Debug)]
enum ApiError {
    Unauthenticated,
    BadRequest(String),
    Sync(SyncError),
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Sync(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, "missing principal".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Sync(e) => {
                let status = match &e {
                    SyncError::AccessDenied => StatusCode::FORBIDDEN,
                    SyncError::NotFound(_) => StatusCode::NOT_FOUND,
                    SyncError::Decode(_) => StatusCode::BAD_REQUEST,
                    SyncError::Persistence(_) | SyncError::Source(_) | SyncError::Internal(_) => {
                        error!(error = %e, "sync request failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Build the router for the sync endpoints.
pub fn router(
    handler: Arc<SyncHandler>,
    auth: Arc<dyn Authenticator>,
    config: &ServerConfig,
) -> Router {
    Router::new()
        .route("/lists/{list_id}/collaborative/full-state", get(full_state))
        .route("/lists/{list_id}/collaborative/sync", post(sync))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .with_state(AppState { handler, auth })
}

async fn full_state(
    State(state): State<AppState>,
    Path(list_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FullStateResponse>, ApiError> {
    let principal = state.principal(&headers)?;
    let full = state.handler.fetch_full_state(&list_id, &principal).await?;
    Ok(Json(FullStateResponse::from(&full)))
}

async fn sync(
    State(state): State<AppState>,
    Path(list_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, ApiError> {
    let principal = state.principal(&headers)?;
    let Json(body) = body?;
    let (vector, update) = body.into_parts().map_err(SyncError::from)?;

    let reply = state
        .handler
        .sync(&list_id, &principal, &vector, update.as_deref())
        .await?;
    Ok(Json(SyncResponse::from(&reply)))
}

/// Serve the sync endpoints until Ctrl-C.
pub async fn serve(
    handler: Arc<SyncHandler>,
    auth: Arc<dyn Authenticator>,
    config: ServerConfig,
) -> std::io::Result<()> {
    let app = router(handler, auth, &config);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}
