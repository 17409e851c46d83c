//! Single-slot flow: every job shares one constant key, so only one job can
//! be outstanding per process. A second job started before the first finishes
//! takes over the slot, and until its own callback lands the slot keeps
//! answering with the previous result.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use garde::Validate;
use serde_json::value::RawValue;

use super::{parse_json, result_response, verify_webhook_secret};
use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::diagnosis::{CallbackAck, DiagnosisResult, InitiateRequest, InitiateResponse};
use crate::models::token::CorrelationToken;

/// POST /api/v1/slot/diagnosis
pub async fn start_diagnosis(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<InitiateResponse>, ApiError> {
    let request: InitiateRequest = parse_json(&body)?;
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let token = state
        .slot_initiator
        .initiate(request.image_url, request.tags)
        .await?;

    Ok(Json(InitiateResponse {
        diagnosis_id: token.to_string(),
    }))
}

/// POST /api/v1/slot/callback — the whole body is the result.
pub async fn receive_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackAck>, ApiError> {
    let stored = store_slot_result(&state, &headers, &body);
    if stored.is_err() {
        metrics::counter!("diagnosis_callbacks_rejected_total").increment(1);
    }
    stored?;
    Ok(Json(CallbackAck { success: true }))
}

fn store_slot_result(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<(), ApiError> {
    verify_webhook_secret(state, headers)?;

    let raw: Box<RawValue> = parse_json(body)?;
    let result = DiagnosisResult::from_raw(&raw).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let bytes = result.as_str().len();
    state.store.put(&CorrelationToken::single_slot(), result)?;

    metrics::counter!("diagnosis_callbacks_total").increment(1);
    tracing::info!(bytes, "Single-slot diagnosis result stored");
    Ok(())
}

/// GET /api/v1/slot/result
pub async fn get_result(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.store.get(&CorrelationToken::single_slot())? {
        Some(result) => Ok(result_response(result)),
        None => Err(ApiError::NotFound),
    }
}
