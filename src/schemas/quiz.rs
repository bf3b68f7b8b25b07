use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::models::{Question, Quiz, QuizSummary};
use crate::db::types::QuestionKind;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionCreate {
    #[serde(default)]
    pub(crate) id: String,
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub(crate) prompt: String,
    pub(crate) kind: QuestionKind,
    #[serde(default)]
    pub(crate) options: Vec<String>,
    #[serde(alias = "gradingReference")]
    pub(crate) grading_reference: String,
}

impl From<QuestionCreate> for Question {
    fn from(value: QuestionCreate) -> Self {
        Self {
            id: value.id,
            prompt: value.prompt,
            kind: value.kind,
            options: value.options,
            grading_reference: value.grading_reference,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuizCreate {
    #[serde(alias = "courseId")]
    #[validate(length(min = 1, message = "course_id must not be empty"))]
    pub(crate) course_id: String,
    #[validate(length(min = 1, max = 200, message = "title must be 1 to 200 characters"))]
    pub(crate) title: String,
    #[validate(nested)]
    pub(crate) questions: Vec<QuestionCreate>,
    #[serde(alias = "timeAllowanceMinutes")]
    #[validate(range(min = 1, max = 1440, message = "time_allowance_minutes must be 1 to 1440"))]
    pub(crate) time_allowance_minutes: i32,
    #[serde(default, alias = "opensAt", with = "time::serde::rfc3339::option")]
    pub(crate) opens_at: Option<OffsetDateTime>,
    #[serde(alias = "closesAt", with = "time::serde::rfc3339")]
    pub(crate) closes_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionResponse {
    pub(crate) id: String,
    pub(crate) prompt: String,
    pub(crate) kind: QuestionKind,
    pub(crate) options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) grading_reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuizResponse {
    pub(crate) id: String,
    pub(crate) course_id: String,
    pub(crate) title: String,
    pub(crate) question_count: usize,
    pub(crate) questions: Vec<QuestionResponse>,
    pub(crate) time_allowance_minutes: i32,
    pub(crate) opens_at: String,
    pub(crate) closes_at: String,
    pub(crate) created_at: String,
}

impl QuizResponse {
    /// Grading references are only included for course staff.
    pub(crate) fn from_db(quiz: Quiz, reveal_references: bool) -> Self {
        let questions: Vec<QuestionResponse> = quiz
            .questions
            .0
            .into_iter()
            .map(|question| QuestionResponse {
                id: question.id,
                prompt: question.prompt,
                kind: question.kind,
                options: question.options,
                grading_reference: reveal_references.then_some(question.grading_reference),
            })
            .collect();

        Self {
            id: quiz.id,
            course_id: quiz.course_id,
            title: quiz.title,
            question_count: questions.len(),
            questions,
            time_allowance_minutes: quiz.time_allowance_minutes,
            opens_at: format_offset(quiz.opens_at),
            closes_at: format_offset(quiz.closes_at),
            created_at: format_offset(quiz.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QuizSummaryResponse {
    #[serde(flatten)]
    pub(crate) quiz: QuizResponse,
    pub(crate) submission_count: i64,
    pub(crate) average_score: Option<f64>,
}

impl QuizSummaryResponse {
    pub(crate) fn from_db(summary: QuizSummary) -> Self {
        Self {
            quiz: QuizResponse::from_db(summary.quiz, false),
            submission_count: summary.submission_count,
            average_score: summary.average_score,
        }
    }
}
