//! NL→SQL query service.
//!
//! A caller posts a free-text question to `/ask`; the service asks the model for a single
//! SELECT statement, runs it through the fail-closed sanitizer in `nlsql-core`, executes it
//! under a bounded read-only transaction, and returns the rows. The sanitizer is the security
//! boundary: nothing the model emits reaches a database connection unvalidated.

use crate::config::ServiceConfig;
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use nlsql_core::gemini::GeminiClient;
use nlsql_core::sanitize::{sanitize_sql, QueryPolicy};
use nlsql_core::SqlGenerator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};

pub mod config;
pub mod db;

const MAX_QUESTION_CHARS: usize = 500;
const LLM_PROBE_QUESTION: &str = "how many rows are in products?";
const SAMPLE_SQL_CHARS: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub cfg: ServiceConfig,
    pub policy: QueryPolicy,
    pub generator: Arc<dyn SqlGenerator>,
    pub pool: sqlx::PgPool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("cfg", &self.cfg)
            .field("policy", &self.policy)
            .field("generator", &"<SqlGenerator>")
            .field("pool", &"<PgPool>")
            .finish()
    }
}

pub fn build_state(cfg: ServiceConfig) -> anyhow::Result<AppState> {
    // Lazy pool: startup is gated on configuration only, and a connection is first acquired
    // after a candidate statement has passed sanitization.
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy(&cfg.database_url)
        .context("configure postgres pool")?;

    let generator: Arc<dyn SqlGenerator> = Arc::new(GeminiClient::new(
        cfg.gemini_api_key.clone(),
        cfg.gemini_model.clone(),
        cfg.max_limit,
    ));
    let policy = QueryPolicy::new(&cfg.allowed_tables, cfg.max_limit);

    Ok(AppState {
        cfg,
        policy,
        generator,
        pool,
    })
}

pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/ask", post(ask))
        .route("/test/llm", get(test_llm))
        .route("/test/db", get(test_db))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub generated_sql: String,
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
}

#[derive(Debug, Serialize)]
pub struct TestLlmResponse {
    pub ok: bool,
    pub message: String,
    pub sample_sql: String,
}

#[derive(Debug, Serialize)]
pub struct TestDbResponse {
    pub ok: bool,
    pub message: String,
    pub version: String,
    pub db: String,
    pub user: String,
}

async fn ask(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question_chars = req.question.chars().count();
    if question_chars == 0 || question_chars > MAX_QUESTION_CHARS {
        return Err(ApiError::unprocessable(format!(
            "question must be between 1 and {MAX_QUESTION_CHARS} characters"
        )));
    }

    let generated_sql = state
        .generator
        .generate_sql(&req.question)
        .await
        .map_err(|err| {
            tracing::error!(
                event = "ask.llm.error",
                error = %format!("{err:#}"),
                "llm generation failed"
            );
            ApiError::bad_gateway(format!("LLM error: {err:#}"))
        })?;

    let safe_sql = sanitize_sql(&state.policy, &generated_sql).map_err(|reason| {
        tracing::info!(
            event = "ask.sql.rejected",
            reason = %reason,
            "unsafe sql rejected"
        );
        ApiError::bad_request(format!("Unsafe SQL: {reason}"))
    })?;

    let rows = db::fetch_rows(
        &state.pool,
        &safe_sql,
        state.cfg.statement_timeout_ms,
        state.cfg.max_limit as usize,
    )
    .await
    .map_err(|err| {
        tracing::error!(
            event = "ask.db.error",
            error = %format!("{err:#}"),
            "db execution failed"
        );
        ApiError::bad_gateway(format!("DB error: {err:#}"))
    })?;

    let row_count = rows.len();
    Ok(Json(AskResponse {
        question: req.question,
        generated_sql: safe_sql,
        rows,
        row_count,
    }))
}

async fn test_llm(State(state): State<Arc<AppState>>) -> Result<Json<TestLlmResponse>, ApiError> {
    let sample = state
        .generator
        .generate_sql(LLM_PROBE_QUESTION)
        .await
        .map_err(|err| {
            tracing::error!(
                event = "test.llm.error",
                error = %format!("{err:#}"),
                "llm probe failed"
            );
            ApiError::bad_gateway(format!("LLM error: {err:#}"))
        })?;

    let sample_sql: String = sample.trim().chars().take(SAMPLE_SQL_CHARS).collect();
    Ok(Json(TestLlmResponse {
        ok: true,
        message: "LLM is reachable".to_string(),
        sample_sql,
    }))
}

async fn test_db(State(state): State<Arc<AppState>>) -> Result<Json<TestDbResponse>, ApiError> {
    let probe = db::probe(&state.pool, state.cfg.statement_timeout_ms)
        .await
        .map_err(|err| {
            tracing::error!(
                event = "test.db.error",
                error = %format!("{err:#}"),
                "db probe failed"
            );
            ApiError::bad_gateway(format!("DB error: {err:#}"))
        })?;

    Ok(Json(TestDbResponse {
        ok: true,
        message: "DB is reachable".to_string(),
        version: probe.version,
        db: probe.db,
        user: probe.user,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
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

    fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}
