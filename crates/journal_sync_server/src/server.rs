//! Main sync server and its HTTP surface.

use crate::auth::{AllowAll, Authorizer};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::store::EntryStore;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use journal_sync_protocol::ErrorBody;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// The sync server.
///
/// Owns the entry store and exposes it through [`RequestHandler`] and an
/// axum [`Router`].
///
/// # Example
///
/// ```no_run
/// use journal_sync_server::{ServerConfig, SyncServer};
///
/// # async fn run() -> journal_sync_server::ServerResult<()> {
/// let server = SyncServer::new(ServerConfig::default())?;
/// server.serve(async { let _ = tokio::signal::ctrl_c().await; }).await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncServer {
    config: ServerConfig,
    handler: Arc<RequestHandler>,
    authorizer: Arc<dyn Authorizer>,
}

#[derive(Clone)]
struct AppState {
    handler: Arc<RequestHandler>,
    authorizer: Arc<dyn Authorizer>,
}

impl SyncServer {
    /// Creates a server over the store in `config.data_dir`.
    ///
    /// Every caller is authorized until [`SyncServer::with_authorizer`] is used.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let store = Arc::new(EntryStore::open(&config.data_dir)?);
        Ok(Self::with_store(config, store))
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<EntryStore>) -> Self {
        let handler = Arc::new(RequestHandler::new(config.clone(), store));
        Self {
            config,
            handler,
            authorizer: Arc::new(AllowAll),
        }
    }

    /// Replaces the authorizer.
    pub fn with_authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Arc::new(authorizer);
        self
    }

    /// The request handler, for in-process callers.
    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<EntryStore> {
        self.handler.store()
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Builds the HTTP router.
    pub fn router(&self) -> Router {
        let state = AppState {
            handler: Arc::clone(&self.handler),
            authorizer: Arc::clone(&self.authorizer),
        };

        let protected = Router::new()
            .route("/sync/status", get(sync_status))
            .route("/sync/manifest", get(sync_manifest))
            .route("/sync/entries/:id", get(get_entry))
            .route("/sync/batch", post(sync_batch))
            .route("/entries", get(list_entries).post(create_entry))
            .route(
                "/entries/:id",
                get(get_entry).put(update_entry).delete(delete_entry),
            )
            .route_layer(middleware::from_fn_with_state(state.clone(), authorize));

        Router::new()
            .route("/health", get(health))
            .merge(protected)
            .layer(DefaultBodyLimit::max(self.config.body_limit))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Binds `config.bind_addr` and serves until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = %listener.local_addr()?, "sync server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("sync server stopped");
        Ok(())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self {
            ServerError::NotFound(_) => ErrorBody::new("Entry not found"),
            ServerError::NotAuthorized(_) => ErrorBody::new("Unauthorized"),
            ServerError::InvalidRequest(_) | ServerError::Validation(_) => {
                ErrorBody::new("Invalid request").with_details(self.to_string())
            }
            ServerError::Serialization(_) | ServerError::Internal(_) | ServerError::Io(_) => {
                error!(error = %self, "request failed");
                ErrorBody::new("Internal server error")
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Runs store work off the async worker threads.
async fn blocking<T, F>(work: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
}

async fn authorize(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if state.authorizer.is_authorized(token) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "rejected unauthorized request");
        ServerError::NotAuthorized("missing or invalid bearer token".into()).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn sync_status(State(state): State<AppState>) -> Result<Response, ServerError> {
    let status = blocking(move || state.handler.handle_status()).await?;
    Ok(Json(status).into_response())
}

async fn sync_manifest(State(state): State<AppState>) -> Result<Response, ServerError> {
    let manifest = blocking(move || state.handler.handle_manifest()).await?;
    Ok(Json(manifest).into_response())
}

async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let entry = blocking(move || state.handler.handle_get_entry(&id)).await?;
    Ok(Json(entry).into_response())
}

async fn sync_batch(State(state): State<AppState>, body: Bytes) -> Result<Response, ServerError> {
    let response = blocking(move || state.handler.handle_batch(&body)).await?;
    Ok(Json(response).into_response())
}

async fn list_entries(State(state): State<AppState>) -> Result<Response, ServerError> {
    let previews = blocking(move || state.handler.handle_list_entries()).await?;
    Ok(Json(previews).into_response())
}

async fn create_entry(State(state): State<AppState>, body: Bytes) -> Result<Response, ServerError> {
    let entry = blocking(move || state.handler.handle_create_entry(&body)).await?;
    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

async fn update_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let entry = blocking(move || state.handler.handle_update_entry(&id, &body)).await?;
    Ok(Json(entry).into_response())
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    blocking(move || state.handler.handle_delete_entry(&id)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
