use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::{state::AppState, time::now_utc};
use crate::schemas::attempt::{
    AttemptResponse, IntegrityEventRequest, OverrideRequest, SubmitRequest,
};
use crate::schemas::MessageResponse;

#[cfg(test)]
mod tests;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/attempts/:attempt_id/submit", post(submit_attempt))
        .route("/attempts/:attempt_id/override", post(override_attempt))
        .route("/attempts/:attempt_id/integrity-events", post(log_integrity_event))
}

async fn submit_attempt(
    Path(attempt_id): Path<String>,
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<AttemptResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let answers = payload.into_raw();
    let attempt = state.attempts().submit(&attempt_id, &caller.id, &answers, now_utc()).await?;
    Ok(Json(AttemptResponse::from_db(attempt)))
}

async fn override_attempt(
    Path(attempt_id): Path<String>,
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<OverrideRequest>,
) -> Result<Json<AttemptResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let attempt = state
        .attempts()
        .override_score(&attempt_id, &caller, payload.score, &payload.feedback, now_utc())
        .await?;
    Ok(Json(AttemptResponse::from_db(attempt)))
}

async fn log_integrity_event(
    Path(attempt_id): Path<String>,
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<IntegrityEventRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state
        .attempts()
        .log_integrity_event(&attempt_id, &caller.id, &payload.event, now_utc())
        .await?;
    Ok(Json(MessageResponse { message: "Integrity event recorded".to_string() }))
}
