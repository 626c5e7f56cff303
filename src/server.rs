//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/` | - | Liveness string |
//! | `GET`  | `/health` | - | Health check (returns version) |
//! | `GET`  | `/tasks` | - | List router tasks |
//! | `POST` | `/token` | - | Exchange form `username`/`password` for a bearer token |
//! | `POST` | `/users/` | - | Register `{email, password}` |
//! | `POST` | `/log-event/` | - | Append a batch of client events |
//! | `POST` | `/agent-request` | bearer | Run a task over `{html, task}` |
//!
//! # Error Contract
//!
//! Plumbing errors use a common body:
//!
//! ```json
//! { "error": { "code": "conflict", "message": "Email already registered" } }
//! ```
//!
//! Codes: `bad_request` (400, including malformed or incomplete bodies),
//! `unauthenticated` (401), `conflict` (409), `internal` (500). `/agent-request` instead always answers with
//! `{message, response}`; collaborator failures add a `code` of
//! `memory_unavailable` or `llm_unavailable` and use status 502.
//!
//! # CORS
//!
//! Origins listed in `[server].cors_origins` may call the API with
//! credentials; methods and headers are mirrored from the preflight. A `*`
//! origin is refused at startup.

use anyhow::Context;
use axum::{
    extract::rejection::{FormRejection, JsonRejection},
    extract::{FromRef, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{AuthState, AuthenticatedUser, TokenIssuer};
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::llm::{self, ChatModel};
use crate::logs;
use crate::memory::SqliteMemory;
use crate::migrate;
use crate::models::{LogCreate, UserCreate, UserOut};
use crate::router::{Personas, Task, TaskRouter, UNKNOWN_TASK_MESSAGE};
use crate::users::{self, UserError};

const ROOT_STATUS: &str = "Aetherium Backend is running!";
const TASK_COMPLETE: &str = "AI task complete!";
const BACKEND_ERROR: &str = "An error occurred in the backend.";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub router: Arc<TaskRouter>,
    pub tokens: Arc<TokenIssuer>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        AuthState {
            pool: state.pool.clone(),
            tokens: state.tokens.clone(),
        }
    }
}

impl AppState {
    /// Wire the router and token issuer from configuration and the given collaborators.
    pub fn new(
        config: &Config,
        pool: SqlitePool,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let memory = SqliteMemory::new(pool.clone(), embedder, config.memory.collection.clone());
        let router = TaskRouter::new(
            Arc::new(memory),
            chat,
            Personas::from_config(&config.prompts),
            config.memory.top_k,
        );
        let tokens = TokenIssuer::new(config.auth.secret(), config.auth.token_ttl_minutes);

        Self {
            pool,
            router: Arc::new(router),
            tokens: Arc::new(tokens),
        }
    }
}

/// Starts the HTTP server with collaborators built from configuration.
///
/// Creates missing tables, then binds to `[server].bind` and serves until
/// Ctrl-C or SIGTERM.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let chat = llm::create_chat_model(&config.llm).context("failed to create chat model")?;
    let embedder =
        embedding::create_provider(&config.embedding).context("failed to create embedder")?;
    run_server_with_collaborators(config, chat, embedder).await
}

/// Starts the server with caller-supplied chat and embedding backends.
///
/// Used by [`run_server`] and by tests that substitute fakes.
pub async fn run_server_with_collaborators(
    config: &Config,
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    info!("creating database tables");
    migrate::create_schema(&pool).await?;

    info!(
        llm = %config.llm.provider,
        model = chat.model_name(),
        embedding = embedder.model_name(),
        collection = %config.memory.collection,
        "collaborators ready"
    );

    let state = AppState::new(config, pool.clone(), chat, embedder);
    let app = build_app(state, cors_layer(&config.server.cors_origins)?);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    pool.close().await;
    Ok(())
}

/// Build the route table over `state`.
pub fn build_app(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/tasks", get(handle_list_tasks))
        .route("/token", post(handle_token))
        .route("/users", post(handle_create_user))
        .route("/users/", post(handle_create_user))
        .route("/log-event", post(handle_log_event))
        .route("/log-event/", post(handle_log_event))
        .route("/agent-request", post(handle_agent_request))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    if origins.iter().any(|o| o.trim() == "*") {
        anyhow::bail!("wildcard CORS origin cannot be combined with credentials");
    }
    let origins = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS origin: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
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

/// An error that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    /// 401 carrying `WWW-Authenticate: Bearer`.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthenticated",
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "conflict",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::EmailTaken => AppError::conflict(err.to_string()),
            UserError::Invalid(msg) => AppError::bad_request(msg),
            other => {
                error!(error = %other, "user operation failed");
                AppError::internal("internal error")
            }
        }
    }
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct RootResponse {
    status: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        status: ROOT_STATUS,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tasks ============

#[derive(Serialize)]
struct TaskInfo {
    name: &'static str,
    description: &'static str,
    uses_memory: bool,
}

#[derive(Serialize)]
struct TaskListResponse {
    tasks: Vec<TaskInfo>,
}

async fn handle_list_tasks() -> Json<TaskListResponse> {
    let tasks = Task::ALL
        .into_iter()
        .map(|t| TaskInfo {
            name: t.as_str(),
            description: t.describe(),
            uses_memory: t.uses_memory(),
        })
        .collect();
    Json(TaskListResponse { tasks })
}

// ============ POST /token ============

#[derive(Deserialize)]
struct TokenForm {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
}

async fn handle_token(
    State(state): State<AppState>,
    form: Result<Form<TokenForm>, FormRejection>,
) -> Result<Json<TokenResponse>, AppError> {
    let Form(form) = form?;
    let user = users::authenticate(&state.pool, &form.username, &form.password)
        .await
        .map_err(|e| {
            error!(error = %e, "login lookup failed");
            AppError::internal("internal error")
        })?
        .ok_or_else(|| AppError::unauthenticated("Incorrect email or password"))?;

    let access_token = state.tokens.issue(&user.email).map_err(|e| {
        error!(error = %e, "token issue failed");
        AppError::internal("internal error")
    })?;

    info!(user_id = user.id, "issued access token");
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

// ============ POST /users/ ============

async fn handle_create_user(
    State(state): State<AppState>,
    body: Result<Json<UserCreate>, JsonRejection>,
) -> Result<(StatusCode, Json<UserOut>), AppError> {
    let Json(body) = body?;
    let user = users::create_user(&state.pool, &body.email, &body.password).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

// ============ POST /log-event/ ============

#[derive(Serialize)]
struct LogEventResponse {
    status: String,
}

async fn handle_log_event(
    State(state): State<AppState>,
    events: Result<Json<Vec<LogCreate>>, JsonRejection>,
) -> Result<Json<LogEventResponse>, AppError> {
    let Json(events) = events?;
    let count = logs::append_events(&state.pool, &events)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to append log events");
            AppError::internal("failed to store events")
        })?;
    Ok(Json(LogEventResponse {
        status: format!("{} events logged", count),
    }))
}

// ============ POST /agent-request ============

#[derive(Deserialize)]
struct AgentRequest {
    html: String,
    task: String,
}

#[derive(Serialize)]
struct AgentResponse {
    message: &'static str,
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

/// Handler for `POST /agent-request`.
///
/// Authentication runs before the body is read. The task name is parsed
/// here, so an unknown task is answered without touching memory or the LLM.
async fn handle_agent_request(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    request: Result<Json<AgentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AgentResponse>), AppError> {
    let Json(request) = request?;
    let task = match request.task.parse::<Task>() {
        Ok(task) => task,
        Err(e) => {
            warn!(error = %e, user = %user.email, "rejected agent request");
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(AgentResponse {
                    message: "Unknown task",
                    response: UNKNOWN_TASK_MESSAGE.to_string(),
                    code: None,
                }),
            ));
        }
    };

    let reply = match state.router.dispatch(task, &request.html, &user.email).await {
        Ok(response) => (
            StatusCode::OK,
            Json(AgentResponse {
                message: TASK_COMPLETE,
                response,
                code: None,
            }),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(AgentResponse {
                message: "Error",
                response: BACKEND_ERROR.to_string(),
                code: Some(e.code()),
            }),
        ),
    };
    Ok(reply)
}
