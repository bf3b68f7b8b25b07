use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::db::types::{AttemptState, QuestionKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) prompt: String,
    pub(crate) kind: QuestionKind,
    #[serde(default)]
    pub(crate) options: Vec<String>,
    /// Correct option for multiple choice, rubric for essays.
    pub(crate) grading_reference: String,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct Quiz {
    pub(crate) id: String,
    pub(crate) course_id: String,
    pub(crate) title: String,
    pub(crate) questions: Json<Vec<Question>>,
    pub(crate) time_allowance_minutes: i32,
    pub(crate) opens_at: OffsetDateTime,
    pub(crate) closes_at: OffsetDateTime,
    pub(crate) created_at: OffsetDateTime,
}

impl Quiz {
    pub(crate) fn is_open_at(&self, now: OffsetDateTime) -> bool {
        self.opens_at <= now && now <= self.closes_at
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct QuizSummary {
    #[sqlx(flatten)]
    pub(crate) quiz: Quiz,
    pub(crate) submission_count: i64,
    pub(crate) average_score: Option<f64>,
}

/// Per-question outcome. Multiple choice always carries a verdict; essays
/// carry judge feedback and never a verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum AnswerOutcome {
    MultipleChoice { correct: bool },
    Essay { feedback: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct AnswerResult {
    pub(crate) question_id: String,
    pub(crate) answer: String,
    pub(crate) points: f64,
    #[serde(flatten)]
    pub(crate) outcome: AnswerOutcome,
}

impl AnswerResult {
    pub(crate) fn correct(&self) -> Option<bool> {
        match self.outcome {
            AnswerOutcome::MultipleChoice { correct } => Some(correct),
            AnswerOutcome::Essay { .. } => None,
        }
    }

    pub(crate) fn feedback(&self) -> Option<&str> {
        match &self.outcome {
            AnswerOutcome::MultipleChoice { .. } => None,
            AnswerOutcome::Essay { feedback } => feedback.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct IntegrityEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) timestamp: OffsetDateTime,
    pub(crate) event: String,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct Attempt {
    pub(crate) id: String,
    pub(crate) quiz_id: String,
    pub(crate) student_id: String,
    pub(crate) course_id: String,
    pub(crate) student_name: String,
    pub(crate) student_number: Option<String>,
    pub(crate) course_name: String,
    pub(crate) state: AttemptState,
    pub(crate) answers: Json<Vec<AnswerResult>>,
    pub(crate) score: Option<i32>,
    pub(crate) feedback: Option<String>,
    pub(crate) integrity_log: Json<Vec<IntegrityEntry>>,
    pub(crate) submitted_at: Option<OffsetDateTime>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl Attempt {
    pub(crate) fn is_graded(&self) -> bool {
        self.state == AttemptState::Graded
    }
}

/// Course record owned by the course service.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct Course {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) instructor_id: String,
}

/// Display fields copied onto an attempt when it is created.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct StudentProfile {
    pub(crate) id: String,
    pub(crate) full_name: String,
    pub(crate) student_number: Option<String>,
}
