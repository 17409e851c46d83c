use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::diagnosis::DiagnosisResult;

pub mod diagnosis;
pub mod health;
pub mod metrics;
pub mod slot;
pub mod upload;

pub const CALLBACK_PATH: &str = "/api/v1/diagnosis/callback";
pub const SLOT_CALLBACK_PATH: &str = "/api/v1/slot/callback";
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// API routes. `/metrics` and the HTTP middleware are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/upload", post(upload::upload_image))
        .route("/api/v1/diagnosis", post(diagnosis::start_diagnosis))
        .route(CALLBACK_PATH, post(diagnosis::receive_callback))
        .route("/api/v1/diagnosis/result", get(diagnosis::get_result))
        .route("/api/v1/diagnosis/result/wait", get(diagnosis::wait_for_result))
        .route("/api/v1/slot/diagnosis", post(slot::start_diagnosis))
        .route(SLOT_CALLBACK_PATH, post(slot::receive_callback))
        .route("/api/v1/slot/result", get(slot::get_result))
        .with_state(state)
}

/// Decode a JSON body, turning any decoding failure into a 400.
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))
}

/// Stored results go back out as the exact JSON text that came in.
fn result_response(result: DiagnosisResult) -> Response {
    ::metrics::counter!("diagnosis_results_served_total").increment(1);
    (
        [(header::CONTENT_TYPE, "application/json")],
        result.as_str().to_owned(),
    )
        .into_response()
}

/// Check the callback's shared secret when one is configured.
fn verify_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.webhook_secret.as_deref() else {
        return Ok(());
    };
    let given = headers
        .get(WEBHOOK_SECRET_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    if secrets_match(expected.as_bytes(), given) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn secrets_match(expected: &[u8], given: &[u8]) -> bool {
    expected.len() == given.len()
        && expected
            .iter()
            .zip(given)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
