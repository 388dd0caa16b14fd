//! HTTP front door for the campus assistant.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer `{"question": ...}` with `{"answer", "source_documents"}` |
//! | `POST` | `/rules/match` | Keyword rule lookup, `{"category", "answer"}` or 404 |
//! | `GET`  | `/health` | Readiness, version and mode |
//!
//! # Service state
//!
//! The query service is built once at start-up and shared through
//! [`AppState`]. When construction fails the server still starts, the
//! failure is kept as [`ServiceState::Failed`], `/health` reports 503 and
//! `/ask` answers 503 `not_ready`. With `serve --offline` no providers are
//! created and `/ask` is answered from the rule table alone.
//!
//! While `campus-rag build` holds the build lock on the served store,
//! `/ask` and `/health` answer 503 `not_ready` until the build finishes.
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "问题不能为空" } }
//! ```
//!
//! | Cause | Status | Code |
//! |-------|--------|------|
//! | blank question, malformed body | 400 | `bad_request` |
//! | no matching rule | 404 | `not_found` |
//! | service not ready | 503 | `not_ready` |
//! | provider timeout | 504 | `timeout` |
//! | other provider failure | 502 | `provider_error` |
//! | store or configuration failure | 500 | `internal` |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::RagError;
use crate::lock;
use crate::models::{Answer, Query};
use crate::query::QueryService;
use crate::rules::{RuleMatch, RuleMatcher, FALLBACK_HINT};

/// Message returned for a blank question.
pub const EMPTY_QUESTION: &str = "问题不能为空";

/// Outcome of start-up initialization.
pub enum ServiceState {
    Ready(Arc<QueryService>),
    /// Rule-only mode; no providers configured.
    Offline,
    /// Initialization failed with this message.
    Failed(String),
}

impl ServiceState {
    pub fn mode(&self) -> &'static str {
        match self {
            ServiceState::Offline => "offline",
            ServiceState::Ready(_) | ServiceState::Failed(_) => "rag",
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    service: Arc<ServiceState>,
    rules: Arc<RuleMatcher>,
    rule_prefilter: bool,
    /// Store directory whose build lock gates `/ask`.
    persist_dir: Option<Arc<PathBuf>>,
}

impl AppState {
    pub fn new(service: ServiceState, rules: RuleMatcher, rule_prefilter: bool) -> Self {
        Self {
            service: Arc::new(service),
            rules: Arc::new(rules),
            rule_prefilter,
            persist_dir: None,
        }
    }

    /// Report not ready while a build holds the lock in `persist_dir`.
    pub fn with_build_lock(mut self, persist_dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(Arc::new(persist_dir.into()));
        self
    }

    fn build_in_progress(&self) -> Option<&Path> {
        self.persist_dir
            .as_deref()
            .map(PathBuf::as_path)
            .filter(|dir| lock::is_locked(dir))
    }

    /// Build the state from configuration. A query service that fails to
    /// initialize is recorded as [`ServiceState::Failed`] rather than
    /// returned as an error.
    pub async fn from_config(config: &Config, offline: bool) -> Self {
        let rules = RuleMatcher::from_config(&config.rules);
        let service = if offline {
            ServiceState::Offline
        } else {
            match QueryService::from_config(config).await {
                Ok(service) => ServiceState::Ready(Arc::new(service)),
                Err(e) => {
                    error!(error = %e, "query service failed to initialize");
                    ServiceState::Failed(e.to_string())
                }
            }
        };
        let state = Self::new(service, rules, config.server.rule_prefilter);
        if offline {
            state
        } else {
            state.with_build_lock(config.store.persist_dir.clone())
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/rules/match", post(handle_rule_match))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind` and run until Ctrl-C.
pub async fn run_server(config: &Config, offline: bool) -> anyhow::Result<()> {
    let state = AppState::from_config(config, offline).await;
    let mode = state.service.mode();
    if let ServiceState::Failed(message) = state.service.as_ref() {
        warn!(error = %message, "serving without a query service; /ask will return 503");
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    let addr = listener.local_addr()?;

    info!(%addr, mode, "server listening");
    println!("campus-rag listening on http://{} ({})", addr, mode);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_ready(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::SERVICE_UNAVAILABLE, "not_ready", message)
}

impl From<RagError> for AppError {
    fn from(e: RagError) -> Self {
        let message = e.to_string();
        match e {
            RagError::Validation(_) => bad_request(message),
            RagError::Provider { .. } if e.is_timeout() => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            RagError::Provider { .. } => {
                AppError::new(StatusCode::BAD_GATEWAY, "provider_error", message)
            }
            RagError::Config(_) | RagError::Store(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

fn question_from(body: Result<Json<Query>, JsonRejection>) -> Result<String, AppError> {
    let Json(query) = body.map_err(|e| bad_request(e.body_text()))?;
    let question = query.question.trim();
    if question.is_empty() {
        return Err(bad_request(EMPTY_QUESTION));
    }
    Ok(question.to_string())
}

// ============ POST /ask ============

async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<Query>, JsonRejection>,
) -> Result<Json<Answer>, AppError> {
    if let ServiceState::Failed(message) = state.service.as_ref() {
        return Err(not_ready(format!("query service not initialized: {}", message)));
    }
    let question = question_from(body)?;

    match state.service.as_ref() {
        ServiceState::Offline => {
            let text = state
                .rules
                .match_question(&question)
                .map(|m| m.answer)
                .unwrap_or_else(|| FALLBACK_HINT.to_string());
            Ok(Json(Answer::uncited(text)))
        }
        ServiceState::Ready(service) => {
            if let Some(dir) = state.build_in_progress() {
                return Err(not_ready(format!(
                    "a build is in progress in {}; try again when it finishes",
                    dir.display()
                )));
            }
            if state.rule_prefilter {
                if let Some(m) = state.rules.match_question(&question) {
                    info!(category = %m.category, "answered from rules");
                    return Ok(Json(Answer::uncited(m.answer)));
                }
            }
            let answer = service.ask(&question).await.map_err(|e| {
                warn!(error = %e, "ask failed");
                AppError::from(e)
            })?;
            Ok(Json(answer))
        }
        ServiceState::Failed(message) => Err(not_ready(message.clone())),
    }
}

// ============ POST /rules/match ============

async fn handle_rule_match(
    State(state): State<AppState>,
    body: Result<Json<Query>, JsonRejection>,
) -> Result<Json<RuleMatch>, AppError> {
    let question = question_from(body)?;
    state
        .rules
        .match_question(&question)
        .map(Json)
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "not_found", "no rule matched"))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mode = state.service.mode();
    let version = env!("CARGO_PKG_VERSION");
    match state.service.as_ref() {
        ServiceState::Failed(message) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "not_ready",
                version,
                mode,
                error: Some(message.clone()),
            }),
        ),
        ServiceState::Ready(_) if state.build_in_progress().is_some() => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "not_ready",
                version,
                mode,
                error: Some("a build is in progress".to_string()),
            }),
        ),
        ServiceState::Ready(_) | ServiceState::Offline => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version,
                mode,
                error: None,
            }),
        ),
    }
}
