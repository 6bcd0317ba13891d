//! Read-only admin HTTP surface.
//!
//! Lets operators browse the audit log, user profiles and counters without
//! touching the database directly. Every route except `/health` requires
//! `Authorization: Bearer <ADMIN_TOKEN>`. Handlers only issue `SELECT`
//! statements.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `GET` | `/admin/dialogs?user_id=&limit=&offset=` | Audit log, newest first |
//! | `GET` | `/admin/users` | User profiles, most recently active first |
//! | `GET` | `/admin/stats` | Message, lead and document counters |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "missing or invalid bearer token" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `internal` (500).

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::stats::{collect_stats, Stats};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 500;

#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    admin_token: Arc<str>,
}

/// Build the admin router. Exposed for tests.
pub fn admin_router(pool: SqlitePool, admin_token: &str) -> Router {
    let state = AppState {
        pool,
        admin_token: Arc::from(admin_token),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/admin/dialogs", get(handle_dialogs))
        .route("/admin/users", get(handle_users))
        .route("/admin/stats", get(handle_stats))
        .layer(cors)
        .with_state(state)
}

/// Serve the admin API on `[server].bind` until the process exits.
pub async fn run_admin_server(config: &Config, pool: SqlitePool) -> Result<()> {
    let token = config
        .secrets
        .admin_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .context("ADMIN_TOKEN environment variable not set")?;

    let app = admin_router(pool, token);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "admin server listening");
    axum::serve(listener, app).await?;
    Ok(())
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
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

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "admin query failed");
        internal("database query failed")
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: "missing or invalid bearer token".to_string(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

fn authorize(headers: &HeaderMap, state: &AppState) -> Result<(), AppError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == &*state.admin_token => Ok(()),
        _ => Err(unauthorized()),
    }
}

fn rfc3339(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

// ============ GET /health ============

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

// ============ GET /admin/dialogs ============

#[derive(Deserialize)]
struct DialogQuery {
    user_id: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct DialogRow {
    id: i64,
    user_id: i64,
    role: String,
    text: String,
    created_at: String,
}

#[derive(Serialize)]
struct DialogsResponse {
    dialogs: Vec<DialogRow>,
    limit: i64,
    offset: i64,
}

async fn handle_dialogs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DialogQuery>,
) -> Result<Json<DialogsResponse>, AppError> {
    authorize(&headers, &state)?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE);
    if !(1..=MAX_PAGE).contains(&limit) {
        return Err(bad_request(format!("limit must be between 1 and {}", MAX_PAGE)));
    }
    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(bad_request("offset must not be negative"));
    }

    let rows = match query.user_id {
        Some(user_id) => {
            sqlx::query(
                r#"
                SELECT id, user_id, role, text, created_at FROM dialog_messages
                WHERE user_id = ? ORDER BY id DESC LIMIT ? OFFSET ?
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&state.pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT id, user_id, role, text, created_at FROM dialog_messages
                ORDER BY id DESC LIMIT ? OFFSET ?
                "#,
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&state.pool)
            .await?
        }
    };

    let dialogs = rows
        .iter()
        .map(|row| DialogRow {
            id: row.get("id"),
            user_id: row.get("user_id"),
            role: row.get("role"),
            text: row.get("text"),
            created_at: rfc3339(row.get("created_at")),
        })
        .collect();

    Ok(Json(DialogsResponse {
        dialogs,
        limit,
        offset,
    }))
}

// ============ GET /admin/users ============

#[derive(Serialize)]
struct UserRow {
    user_id: i64,
    display_name: Option<String>,
    full_name: Option<String>,
    phone: Option<String>,
    service_code: Option<String>,
    state: String,
    messages: i64,
    updated_at: String,
}

#[derive(Serialize)]
struct UsersResponse {
    users: Vec<UserRow>,
}

async fn handle_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsersResponse>, AppError> {
    authorize(&headers, &state)?;

    let rows = sqlx::query(
        r#"
        SELECT p.user_id, p.display_name, p.full_name, p.phone, p.service_code, p.state,
               p.updated_at,
               (SELECT COUNT(*) FROM dialog_messages d WHERE d.user_id = p.user_id) AS messages
        FROM user_profiles p
        ORDER BY p.updated_at DESC, p.user_id
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let users = rows
        .iter()
        .map(|row| UserRow {
            user_id: row.get("user_id"),
            display_name: row.get("display_name"),
            full_name: row.get("full_name"),
            phone: row.get("phone"),
            service_code: row.get("service_code"),
            state: row.get("state"),
            messages: row.get("messages"),
            updated_at: rfc3339(row.get("updated_at")),
        })
        .collect();

    Ok(Json(UsersResponse { users }))
}

// ============ GET /admin/stats ============

async fn handle_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Stats>, AppError> {
    authorize(&headers, &state)?;
    let stats = collect_stats(&state.pool).await.map_err(|e| {
        tracing::error!(error = %format!("{:#}", e), "stats query failed");
        internal("stats query failed")
    })?;
    Ok(Json(stats))
}
