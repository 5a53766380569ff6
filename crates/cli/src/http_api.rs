use crate::server_security::AuthToken;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use schemaless_engine::{has_output, CancelToken, EngineError, TranslateOptions, Translator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub struct AppState {
    pub translator: Translator,
    pub auth_token: Option<AuthToken>,
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TranslateQuery {
    #[serde(default)]
    pub prefix: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/translate/:standard", post(translate))
        .route("/api/v1/translate/:standard", post(translate))
        .route("/health", get(health))
        .with_state(state)
}

/// Cancels in-flight work when the client goes away and the handler future
/// is dropped.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn translate(
    State(state): State<Arc<AppState>>,
    Path(standard): Path<String>,
    Query(query): Query<TranslateQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(denied) = authorize(&headers, &state) {
        return denied;
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return error_response(StatusCode::BAD_REQUEST, "Request body is empty".to_string());
    }

    let cancel = CancelToken::new();
    let _cancel_on_drop = CancelOnDrop(cancel.clone());
    let options = TranslateOptions {
        key_prefix: query.prefix.unwrap_or_default(),
        skip_substandard: false,
    };

    match state
        .translator
        .translate(&standard, &body, &options, &cancel)
        .await
    {
        Ok(outcome) if !has_output(&outcome.document) => {
            log::warn!(
                "Translation into '{standard}' produced no output ({:?})",
                outcome.source
            );
            error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Translation produced no output".to_string(),
            )
        }
        Ok(outcome) => {
            log::info!(
                "Translated {} bytes into '{standard}' ({:?})",
                body.len(),
                outcome.source
            );
            (StatusCode::OK, Json(outcome.document)).into_response()
        }
        Err(err) => {
            let (status, reason) = classify_error(&err);
            if status.is_server_error() {
                log::error!("Translation into '{standard}' failed: {err}");
            } else {
                log::warn!("Translation into '{standard}' rejected: {err}");
            }
            error_response(status, reason)
        }
    }
}

async fn health(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(denied) = authorize(&headers, &state) {
        return denied;
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({"success": true, "status": "ok"})),
    )
        .into_response()
}

fn authorize(headers: &HeaderMap, state: &AppState) -> Option<Response> {
    let token = state.auth_token.as_ref()?;
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| token.matches_http_authorization_header(value));
    if authorized {
        return None;
    }
    let mut response = error_response(
        StatusCode::UNAUTHORIZED,
        "Missing or invalid Authorization header".to_string(),
    );
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    Some(response)
}

/// HTTP status and client-facing reason for an engine error. Reasons never
/// carry paths, keys or upstream messages.
pub fn classify_error(err: &EngineError) -> (StatusCode, String) {
    match err {
        EngineError::Parse(_) => (
            StatusCode::BAD_REQUEST,
            "Input is not a valid JSON or YAML object".to_string(),
        ),
        EngineError::SchemaNotFound(name) => {
            (StatusCode::NOT_FOUND, format!("Standard '{name}' not found"))
        }
        EngineError::InputTooLarge { size, limit } => (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Input structure too large ({size} > {limit} characters)"),
        ),
        EngineError::InvalidMapping(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "Could not derive a mapping for this input".to_string(),
        ),
        EngineError::ModelUnavailable(_) => (
            StatusCode::FAILED_DEPENDENCY,
            "Mapping model unavailable".to_string(),
        ),
        EngineError::Cancelled => (
            StatusCode::REQUEST_TIMEOUT,
            "Request cancelled".to_string(),
        ),
        EngineError::Cache(_) | EngineError::Storage(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal storage error".to_string(),
        ),
    }
}

pub(crate) fn error_response(status: StatusCode, reason: String) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            success: false,
            reason,
        }),
    )
        .into_response()
}
