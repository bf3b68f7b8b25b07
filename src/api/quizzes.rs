use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::{state::AppState, time::now_utc};
use crate::schemas::attempt::{AttemptResponse, OwnAttemptResponse};
use crate::schemas::quiz::{QuizCreate, QuizResponse, QuizSummaryResponse};
use crate::services::quizzes::QuizDraft;


pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/quizzes", post(create_quiz))
        .route("/quizzes/:quiz_id", get(get_quiz).delete(delete_quiz))
        .route("/quizzes/:quiz_id/start", post(start_attempt))
        .route("/quizzes/:quiz_id/attempts", get(list_attempts))
        .route("/quizzes/:quiz_id/attempts/me", get(own_attempt))
        .route("/courses/:course_id/quizzes", get(list_course_quizzes))
}

async fn create_quiz(
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<QuizCreate>,
) -> Result<(StatusCode, Json<QuizResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let draft = QuizDraft {
        course_id: payload.course_id,
        title: payload.title,
        questions: payload.questions.into_iter().map(Into::into).collect(),
        time_allowance_minutes: payload.time_allowance_minutes,
        opens_at: payload.opens_at,
        closes_at: payload.closes_at,
    };
    let quiz = state.quizzes().create(&caller, draft, now_utc()).await?;

    Ok((StatusCode::CREATED, Json(QuizResponse::from_db(quiz, true))))
}

async fn get_quiz(
    Path(quiz_id): Path<String>,
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<QuizResponse>, ApiError> {
    let quiz = state.quizzes().get(&quiz_id).await?;
    let reveal = state.quizzes().can_manage(&quiz.course_id, &caller).await?;
    Ok(Json(QuizResponse::from_db(quiz, reveal)))
}

async fn delete_quiz(
    Path(quiz_id): Path<String>,
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.quizzes().delete(&quiz_id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_course_quizzes(
    Path(course_id): Path<String>,
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<QuizSummaryResponse>>, ApiError> {
    tracing::debug!(user_id = %caller.id, course_id = %course_id, "Listing course quizzes");
    let summaries = state.quizzes().list_for_course(&course_id).await?;

    // Listings never carry grading references, even for staff.
    Ok(Json(summaries.into_iter().map(QuizSummaryResponse::from_db).collect()))
}

async fn start_attempt(
    Path(quiz_id): Path<String>,
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let attempt = state.attempts().start(&quiz_id, &caller.id, now_utc()).await?;
    Ok(Json(AttemptResponse::from_db(attempt)))
}

async fn list_attempts(
    Path(quiz_id): Path<String>,
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<AttemptResponse>>, ApiError> {
    let attempts = state.attempts().list_attempts(&quiz_id, &caller).await?;
    Ok(Json(attempts.into_iter().map(AttemptResponse::from_db).collect()))
}

async fn own_attempt(
    Path(quiz_id): Path<String>,
    CurrentUser(caller): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<OwnAttemptResponse>, ApiError> {
    let (quiz, attempt) = state.attempts().own_attempt(&quiz_id, &caller.id).await?;
    Ok(Json(OwnAttemptResponse {
        attempt: AttemptResponse::from_db(attempt),
        quiz: QuizResponse::from_db(quiz, false),
    }))
}
