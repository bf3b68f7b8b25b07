use sqlx::types::Json;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::db::models::{AnswerResult, Attempt, IntegrityEntry};
use crate::db::types::AttemptState;

use super::{GradeUpdate, NewAttempt, QuizStats};

pub(crate) const COLUMNS: &str = "\
    id, quiz_id, student_id, course_id, student_name, student_number, course_name, \
    state, answers, score, feedback, integrity_log, submitted_at, created_at, updated_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM quiz_attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_for_student(
    executor: impl sqlx::PgExecutor<'_>,
    quiz_id: &str,
    student_id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM quiz_attempts WHERE quiz_id = $1 AND student_id = $2"
    ))
    .bind(quiz_id)
    .bind(student_id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn list_by_quiz(pool: &PgPool, quiz_id: &str) -> Result<Vec<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM quiz_attempts WHERE quiz_id = $1 ORDER BY created_at, id"
    ))
    .bind(quiz_id)
    .fetch_all(pool)
    .await
}

/// Returns `true` when this call created the row. A conflicting row from a
/// concurrent start is left untouched.
pub(crate) async fn insert_if_absent(
    executor: impl sqlx::PgExecutor<'_>,
    attempt: &NewAttempt,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO quiz_attempts (
            id, quiz_id, student_id, course_id, student_name, student_number, course_name,
            state, answers, integrity_log, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$11)
        ON CONFLICT (quiz_id, student_id) DO NOTHING",
    )
    .bind(&attempt.id)
    .bind(&attempt.quiz_id)
    .bind(&attempt.student_id)
    .bind(&attempt.course_id)
    .bind(&attempt.student_name)
    .bind(&attempt.student_number)
    .bind(&attempt.course_name)
    .bind(AttemptState::InProgress)
    .bind(Json(Vec::<AnswerResult>::new()))
    .bind(Json(Vec::<IntegrityEntry>::new()))
    .bind(attempt.created_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Replaces answers and score in one statement, guarded on the attempt still
/// being in progress. `None` means the guard did not match.
pub(crate) async fn record_grade(
    pool: &PgPool,
    id: &str,
    update: &GradeUpdate,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE quiz_attempts
         SET answers = $1,
             score = $2,
             state = $3,
             submitted_at = $4,
             updated_at = $4
         WHERE id = $5 AND state = $6
         RETURNING {COLUMNS}"
    ))
    .bind(Json(&update.answers))
    .bind(update.score)
    .bind(AttemptState::Graded)
    .bind(update.submitted_at)
    .bind(id)
    .bind(AttemptState::InProgress)
    .fetch_optional(pool)
    .await
}

/// Forces the attempt to graded. An attempt that was never submitted takes
/// `now` as its submission time.
pub(crate) async fn override_grade(
    pool: &PgPool,
    id: &str,
    score: i32,
    feedback: &str,
    now: OffsetDateTime,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE quiz_attempts
         SET score = $1,
             feedback = $2,
             state = $3,
             submitted_at = COALESCE(submitted_at, $4),
             updated_at = $4
         WHERE id = $5
         RETURNING {COLUMNS}"
    ))
    .bind(score)
    .bind(feedback)
    .bind(AttemptState::Graded)
    .bind(now)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn append_integrity_event(
    pool: &PgPool,
    id: &str,
    entry: &IntegrityEntry,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE quiz_attempts
         SET integrity_log = integrity_log || $1::jsonb,
             updated_at = $2
         WHERE id = $3",
    )
    .bind(Json(vec![entry]))
    .bind(entry.timestamp)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn stats_for_quiz(pool: &PgPool, quiz_id: &str) -> Result<QuizStats, sqlx::Error> {
    let (submission_count, average_score) = sqlx::query_as::<_, (i64, Option<f64>)>(
        "SELECT COUNT(*)::BIGINT, AVG(score)::DOUBLE PRECISION
         FROM quiz_attempts
         WHERE quiz_id = $1 AND state = $2",
    )
    .bind(quiz_id)
    .bind(AttemptState::Graded)
    .fetch_one(pool)
    .await?;

    Ok(QuizStats { submission_count, average_score })
}
