//! Persistence seams. Each table keeps its sqlx queries as free functions
//! (`attempts`, `quizzes`, `directory`); `PgStore` wires them behind the
//! traits the lifecycle controller depends on.

pub(crate) mod attempts;
pub(crate) mod directory;
pub(crate) mod health;
#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod quizzes;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;

use crate::db::models::{
    AnswerResult, Attempt, Course, IntegrityEntry, Question, Quiz, QuizSummary, StudentProfile,
};

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct NewQuiz {
    pub(crate) id: String,
    pub(crate) course_id: String,
    pub(crate) title: String,
    pub(crate) questions: Vec<Question>,
    pub(crate) time_allowance_minutes: i32,
    pub(crate) opens_at: OffsetDateTime,
    pub(crate) closes_at: OffsetDateTime,
    pub(crate) created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct NewAttempt {
    pub(crate) id: String,
    pub(crate) quiz_id: String,
    pub(crate) student_id: String,
    pub(crate) course_id: String,
    pub(crate) student_name: String,
    pub(crate) student_number: Option<String>,
    pub(crate) course_name: String,
    pub(crate) created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct GradeUpdate {
    pub(crate) answers: Vec<AnswerResult>,
    pub(crate) score: i32,
    pub(crate) submitted_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct QuizStats {
    pub(crate) submission_count: i64,
    pub(crate) average_score: Option<f64>,
}

/// Outcome of the atomic insert-if-absent used by `start`.
#[derive(Debug, Clone)]
pub(crate) struct UpsertedAttempt {
    pub(crate) attempt: Attempt,
    pub(crate) created: bool,
}

#[async_trait]
pub(crate) trait QuizRepository: Send + Sync {
    async fn find_quiz(&self, quiz_id: &str) -> Result<Option<Quiz>, StoreError>;
    async fn create_quiz(&self, quiz: NewQuiz) -> Result<Quiz, StoreError>;
    async fn delete_quiz(&self, quiz_id: &str) -> Result<bool, StoreError>;
    async fn list_course_quizzes(&self, course_id: &str) -> Result<Vec<QuizSummary>, StoreError>;
}

#[async_trait]
pub(crate) trait AttemptRepository: Send + Sync {
    async fn insert_attempt_if_absent(
        &self,
        attempt: NewAttempt,
    ) -> Result<UpsertedAttempt, StoreError>;
    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError>;
    async fn find_student_attempt(
        &self,
        quiz_id: &str,
        student_id: &str,
    ) -> Result<Option<Attempt>, StoreError>;
    async fn list_quiz_attempts(&self, quiz_id: &str) -> Result<Vec<Attempt>, StoreError>;
    /// `None` when the attempt is missing or no longer in progress.
    async fn record_grade(
        &self,
        attempt_id: &str,
        update: GradeUpdate,
    ) -> Result<Option<Attempt>, StoreError>;
    async fn override_grade(
        &self,
        attempt_id: &str,
        score: i32,
        feedback: String,
        now: OffsetDateTime,
    ) -> Result<Option<Attempt>, StoreError>;
    async fn append_integrity_event(
        &self,
        attempt_id: &str,
        entry: IntegrityEntry,
    ) -> Result<bool, StoreError>;
    async fn quiz_stats(&self, quiz_id: &str) -> Result<QuizStats, StoreError>;
}

/// Read-only view of the course, enrollment and display-name services.
#[async_trait]
pub(crate) trait Directory: Send + Sync {
    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError>;
    async fn is_enrolled(&self, course_id: &str, student_id: &str) -> Result<bool, StoreError>;
    async fn enrolled_students(&self, course_id: &str) -> Result<Vec<String>, StoreError>;
    async fn student_profile(&self, student_id: &str)
        -> Result<Option<StudentProfile>, StoreError>;
}

#[async_trait]
pub(crate) trait Store: QuizRepository + AttemptRepository + Directory {
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub(crate) struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuizRepository for PgStore {
    async fn find_quiz(&self, quiz_id: &str) -> Result<Option<Quiz>, StoreError> {
        Ok(quizzes::find_by_id(&self.pool, quiz_id).await?)
    }

    async fn create_quiz(&self, quiz: NewQuiz) -> Result<Quiz, StoreError> {
        Ok(quizzes::create(&self.pool, &quiz).await?)
    }

    async fn delete_quiz(&self, quiz_id: &str) -> Result<bool, StoreError> {
        Ok(quizzes::delete(&self.pool, quiz_id).await?)
    }

    async fn list_course_quizzes(&self, course_id: &str) -> Result<Vec<QuizSummary>, StoreError> {
        Ok(quizzes::list_by_course_with_stats(&self.pool, course_id).await?)
    }
}

#[async_trait]
impl AttemptRepository for PgStore {
    async fn insert_attempt_if_absent(
        &self,
        attempt: NewAttempt,
    ) -> Result<UpsertedAttempt, StoreError> {
        let created = attempts::insert_if_absent(&self.pool, &attempt).await?;
        // Separate statement: a row committed by a concurrent start must be
        // visible to this read.
        let stored =
            attempts::find_for_student(&self.pool, &attempt.quiz_id, &attempt.student_id)
                .await?
                .ok_or(sqlx::Error::RowNotFound)?;
        Ok(UpsertedAttempt { attempt: stored, created })
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        Ok(attempts::find_by_id(&self.pool, attempt_id).await?)
    }

    async fn find_student_attempt(
        &self,
        quiz_id: &str,
        student_id: &str,
    ) -> Result<Option<Attempt>, StoreError> {
        Ok(attempts::find_for_student(&self.pool, quiz_id, student_id).await?)
    }

    async fn list_quiz_attempts(&self, quiz_id: &str) -> Result<Vec<Attempt>, StoreError> {
        Ok(attempts::list_by_quiz(&self.pool, quiz_id).await?)
    }

    async fn record_grade(
        &self,
        attempt_id: &str,
        update: GradeUpdate,
    ) -> Result<Option<Attempt>, StoreError> {
        Ok(attempts::record_grade(&self.pool, attempt_id, &update).await?)
    }

    async fn override_grade(
        &self,
        attempt_id: &str,
        score: i32,
        feedback: String,
        now: OffsetDateTime,
    ) -> Result<Option<Attempt>, StoreError> {
        Ok(attempts::override_grade(&self.pool, attempt_id, score, &feedback, now).await?)
    }

    async fn append_integrity_event(
        &self,
        attempt_id: &str,
        entry: IntegrityEntry,
    ) -> Result<bool, StoreError> {
        Ok(attempts::append_integrity_event(&self.pool, attempt_id, &entry).await?)
    }

    async fn quiz_stats(&self, quiz_id: &str) -> Result<QuizStats, StoreError> {
        Ok(attempts::stats_for_quiz(&self.pool, quiz_id).await?)
    }
}

#[async_trait]
impl Directory for PgStore {
    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError> {
        Ok(directory::find_course(&self.pool, course_id).await?)
    }

    async fn is_enrolled(&self, course_id: &str, student_id: &str) -> Result<bool, StoreError> {
        Ok(directory::is_enrolled(&self.pool, course_id, student_id).await?)
    }

    async fn enrolled_students(&self, course_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(directory::list_enrolled_students(&self.pool, course_id).await?)
    }

    async fn student_profile(
        &self,
        student_id: &str,
    ) -> Result<Option<StudentProfile>, StoreError> {
        Ok(directory::find_student_profile(&self.pool, student_id).await?)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(health::ping(&self.pool).await?)
    }
}
