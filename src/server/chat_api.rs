//! Chat relay HTTP API.
//!
//! Endpoints:
//! - POST /api/chat            buffered completion with retry
//! - POST /api/chat/stream     SSE streaming completion
//! - OPTIONS /api/chat/stream  CORS pre-flight (handled by the CORS layer)
//! - GET /api/health           configuration probe

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::server::streaming::events_to_sse_stream;
use crate::upstream::client::{CompletionRequest, CompletionResult, UpstreamClient};
use crate::upstream::retry::{complete_with_retry, DEFAULT_MAX_RETRIES};

/// Application state shared across handlers. Immutable after startup; each
/// request is an independent task with no cross-request state.
pub struct AppState {
    /// `None` when no API key is configured; chat endpoints then return 500.
    pub upstream: Option<UpstreamClient>,
    pub config: Arc<Config>,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Inbound chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Outward response for the buffered endpoint and for validation failures.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponse {
    fn ok(text: String) -> Self {
        Self {
            success: true,
            response: Some(text),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(message.into()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub api_configured: bool,
}

// ─── Validation ────────────────────────────────────────────────────────────

/// Resolve the inbound body to a trimmed, non-empty message (plus the
/// optional system prompt override) before any upstream I/O.
fn validate(
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<(String, Option<String>), (StatusCode, Json<ChatResponse>)> {
    let Json(request) = payload.map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ChatResponse::err("request body is empty or invalid")),
        )
    })?;

    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ChatResponse::err("message is empty")),
        ));
    }

    Ok((message, request.system_prompt))
}

fn unconfigured() -> (StatusCode, Json<ChatResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ChatResponse::err("completion API is not configured")),
    )
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> (StatusCode, Json<ChatResponse>) {
    let request_id = Uuid::new_v4().to_string();

    let Some(client) = &state.upstream else {
        error!(request_id, "Chat request with no upstream configured");
        return unconfigured();
    };

    let (message, _) = match validate(payload) {
        Ok(valid) => valid,
        Err(rejection) => return rejection,
    };

    info!(
        request_id,
        model = state.config.model,
        preview = %message.chars().take(50).collect::<String>(),
        "Chat request"
    );

    let request = CompletionRequest::buffered(message);
    let started = Instant::now();
    let result = complete_with_retry(client, &request, DEFAULT_MAX_RETRIES).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        CompletionResult::Success { text } => {
            info!(request_id, elapsed_ms, response_chars = text.len(), "Chat succeeded");
            (StatusCode::OK, Json(ChatResponse::ok(text)))
        }
        CompletionResult::Failure { message } => {
            error!(request_id, elapsed_ms, error = %message, "Chat failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ChatResponse::err(message)))
        }
    }
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let Some(client) = &state.upstream else {
        error!(request_id, "Stream request with no upstream configured");
        return unconfigured().into_response();
    };

    let (message, system_prompt) = match validate(payload) {
        Ok(valid) => valid,
        Err(rejection) => return rejection.into_response(),
    };

    info!(
        request_id,
        model = state.config.model,
        preview = %message.chars().take(50).collect::<String>(),
        "Stream request"
    );

    let request = CompletionRequest::streaming(message, system_prompt);
    let rx = client.complete_streaming(request);

    let mut response = Sse::new(events_to_sse_stream(rx)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    // Close the connection after the final frame instead of leaving the
    // keep-alive socket open once the stream is done.
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        api_configured: state.upstream.is_some(),
    })
}
