//! Axum HTTP front end over the synthesis engine.
//!
//! # Routes
//!
//! - `GET    /health`             - liveness plus provider state
//! - `POST   /chat`               - `{message, personality?, user_id?, session?}` -> `{response}`
//! - `GET    /personalities`      - catalog listing
//! - `POST   /personality`        - `{key, session?}` -> `{ok, message, session}`
//! - `GET    /profile/:user_id`   - profile and history counters
//! - `DELETE /users/:user_id`     - forget a user
//!
//! Generation problems never become HTTP errors. Store failures map to 500.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::engine::{EngineError, SynthesisEngine};
use crate::personality::Session;

/// User id for requests that do not name one.
pub const DEFAULT_WEB_USER: &str = "web_user";

type ApiError = (StatusCode, Json<Value>);

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// The engine every route delegates to.
    pub engine: Arc<SynthesisEngine>,
    /// Personality sessions keyed by session id.
    pub sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl AppState {
    /// State over `engine` with no sessions yet.
    pub fn new(engine: Arc<SynthesisEngine>) -> Self {
        Self {
            engine,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn session(&self, id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn save_session(&self, session: Session) {
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(session.id.clone(), session);
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/personalities", get(personalities_handler))
        .route("/personality", post(switch_handler))
        .route("/profile/:user_id", get(profile_handler))
        .route("/users/:user_id", delete(clear_handler))
        .with_state(state)
}

/// Bind `addr` and serve until the process is interrupted.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    info!(addr, status = %state.engine.status_line(), "http server listening");

    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn store_failure(e: EngineError) -> ApiError {
    error!(error = %e, "request failed on conversation store");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health - liveness probe.
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "provider": state.engine.provider_state(),
        "detail": state.engine.status_line(),
    }))
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user's message.
    pub message: String,
    /// Personality for this turn; overrides the session's.
    #[serde(default)]
    pub personality: Option<String>,
    /// Conversation owner; defaults to [`DEFAULT_WEB_USER`].
    #[serde(default)]
    pub user_id: Option<String>,
    /// Session created by `POST /personality`.
    #[serde(default)]
    pub session: Option<String>,
}

/// POST /chat - process one turn.
async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let user_id = request.user_id.as_deref().unwrap_or(DEFAULT_WEB_USER);

    let session = request.session.as_deref().and_then(|id| state.session(id));
    let personality = request
        .personality
        .as_deref()
        .or(session.as_ref().map(|s| s.personality.as_str()));
    let session_id = session.as_ref().map(|s| s.id.as_str());

    let response = state
        .engine
        .submit_with(user_id, message, personality, session_id)
        .await
        .map_err(store_failure)?;

    Ok(Json(json!({ "response": response })))
}

/// GET /personalities - list the catalog.
async fn personalities_handler(State(state): State<AppState>) -> Json<Value> {
    let catalog = state.engine.catalog();
    let entries: Vec<Value> = catalog
        .list()
        .into_iter()
        .map(|p| {
            json!({
                "key": p.key,
                "display_name": p.display_name,
                "description": p.description,
                "traits": p.trait_weights,
            })
        })
        .collect();
    Json(json!({
        "default": catalog.default_key(),
        "personalities": entries,
    }))
}

/// Body of `POST /personality`.
#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    /// Personality key to switch to.
    pub key: String,
    /// Session to switch; a new one is created if absent or unknown.
    #[serde(default)]
    pub session: Option<String>,
}

/// POST /personality - switch a session's personality.
async fn switch_handler(
    State(state): State<AppState>,
    Json(request): Json<SwitchRequest>,
) -> Json<Value> {
    let mut session = request
        .session
        .as_deref()
        .and_then(|id| state.session(id))
        .unwrap_or_else(|| state.engine.new_session());

    let outcome = state.engine.switch_personality(&mut session, &request.key);
    let body = json!({
        "ok": outcome.ok,
        "message": outcome.message,
        "session": session.id,
        "personality": session.personality,
    });
    state.save_session(session);
    Json(body)
}

/// GET /profile/:user_id - profile and counters.
async fn profile_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let profile = state
        .engine
        .profile_snapshot(&user_id)
        .await
        .map_err(store_failure)?;
    let stats = state.engine.stats(&user_id).await.map_err(store_failure)?;
    Ok(Json(json!({ "profile": profile, "stats": stats })))
}

/// DELETE /users/:user_id - forget everything about a user.
async fn clear_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.clear(&user_id).await.map_err(store_failure)?;
    Ok(Json(json!({ "ok": true })))
}
