use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use garde::Validate;
use std::time::Duration;

use super::{parse_json, result_response, verify_webhook_secret};
use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::diagnosis::{
    CallbackAck, CallbackPayload, DiagnosisResult, InitiateRequest, InitiateResponse, ResultQuery,
    WaitQuery,
};
use crate::models::token::CorrelationToken;

/// POST /api/v1/diagnosis — dispatch a diagnosis job for an uploaded photo.
pub async fn start_diagnosis(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<InitiateResponse>, ApiError> {
    let request: InitiateRequest = parse_json(&body)?;
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let token = state
        .initiator
        .initiate(request.image_url, request.tags)
        .await?;

    Ok(Json(InitiateResponse {
        diagnosis_id: token.to_string(),
    }))
}

/// POST /api/v1/diagnosis/callback — webhook the processor calls with a result.
pub async fn receive_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackAck>, ApiError> {
    let stored = store_callback(&state, &headers, &body);
    if stored.is_err() {
        metrics::counter!("diagnosis_callbacks_rejected_total").increment(1);
    }
    stored?;
    Ok(Json(CallbackAck { success: true }))
}

fn store_callback(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<(), ApiError> {
    verify_webhook_secret(state, headers)?;

    let payload: CallbackPayload = parse_json(body)?;
    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let diagnosis_id = payload.diagnosis_id.unwrap_or_default();
    let token = CorrelationToken::parse(&diagnosis_id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let raw = payload
        .result
        .ok_or_else(|| ApiError::BadRequest("result is required".to_string()))?;
    let result = DiagnosisResult::from_raw(&raw).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let bytes = result.as_str().len();
    state.store.put(&token, result)?;

    metrics::counter!("diagnosis_callbacks_total").increment(1);
    tracing::info!(token = %token, bytes, "Diagnosis result stored");
    Ok(())
}

/// GET /api/v1/diagnosis/result?id= — 404 until the callback has arrived.
pub async fn get_result(
    State(state): State<AppState>,
    Query(query): Query<ResultQuery>,
) -> Result<Response, ApiError> {
    let token = required_token(query.id.as_deref())?;
    match state.store.get(&token)? {
        Some(result) => Ok(result_response(result)),
        None => Err(ApiError::NotFound),
    }
}

/// GET /api/v1/diagnosis/result/wait?id=&timeoutSecs= — like `get_result`,
/// but holds the request open until the result lands or the timeout passes.
pub async fn wait_for_result(
    State(state): State<AppState>,
    Query(query): Query<WaitQuery>,
) -> Result<Response, ApiError> {
    let token = required_token(query.id.as_deref())?;
    let timeout = query
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.long_poll_max)
        .min(state.long_poll_max);

    match state.store.wait_for(&token, timeout).await? {
        Some(result) => Ok(result_response(result)),
        None => Err(ApiError::NotFound),
    }
}

fn required_token(id: Option<&str>) -> Result<CorrelationToken, ApiError> {
    let id = id.ok_or_else(|| ApiError::BadRequest("id is required".to_string()))?;
    CorrelationToken::parse(id).map_err(|e| ApiError::BadRequest(e.to_string()))
}
