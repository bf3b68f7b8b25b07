use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::models::{AnswerResult, Attempt, IntegrityEntry};
use crate::db::types::AttemptState;
use crate::schemas::quiz::QuizResponse;
use crate::services::scoring::RawAnswer;

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct AnswerSubmit {
    #[serde(alias = "questionId")]
    pub(crate) question_id: String,
    #[serde(alias = "answerText")]
    pub(crate) answer: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmitRequest {
    #[validate(length(max = 500, message = "too many answers"))]
    pub(crate) answers: Vec<AnswerSubmit>,
}

impl SubmitRequest {
    pub(crate) fn into_raw(self) -> Vec<RawAnswer> {
        self.answers
            .into_iter()
            .map(|answer| RawAnswer { question_id: answer.question_id, answer: answer.answer })
            .collect()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct OverrideRequest {
    #[validate(range(min = 0, max = 100, message = "score must be between 0 and 100"))]
    pub(crate) score: i32,
    #[serde(default)]
    #[validate(length(max = 2000, message = "feedback is too long"))]
    pub(crate) feedback: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct IntegrityEventRequest {
    #[validate(length(min = 1, message = "event must not be empty"))]
    pub(crate) event: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) id: String,
    pub(crate) quiz_id: String,
    pub(crate) student_id: String,
    pub(crate) course_id: String,
    pub(crate) student_name: String,
    pub(crate) student_number: Option<String>,
    pub(crate) course_name: String,
    pub(crate) state: AttemptState,
    pub(crate) answers: Vec<AnswerResult>,
    pub(crate) score: Option<i32>,
    pub(crate) feedback: Option<String>,
    pub(crate) integrity_log: Vec<IntegrityEntry>,
    pub(crate) submitted_at: Option<String>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl AttemptResponse {
    pub(crate) fn from_db(attempt: Attempt) -> Self {
        Self {
            id: attempt.id,
            quiz_id: attempt.quiz_id,
            student_id: attempt.student_id,
            course_id: attempt.course_id,
            student_name: attempt.student_name,
            student_number: attempt.student_number,
            course_name: attempt.course_name,
            state: attempt.state,
            answers: attempt.answers.0,
            score: attempt.score,
            feedback: attempt.feedback,
            integrity_log: attempt.integrity_log.0,
            submitted_at: attempt.submitted_at.map(format_offset),
            created_at: format_offset(attempt.created_at),
            updated_at: format_offset(attempt.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct OwnAttemptResponse {
    pub(crate) attempt: AttemptResponse,
    pub(crate) quiz: QuizResponse,
}
