use sqlx::types::Json;
use sqlx::PgPool;

use crate::db::models::{Quiz, QuizSummary};
use crate::db::types::AttemptState;

use super::NewQuiz;

pub(crate) const COLUMNS: &str = "\
    id, course_id, title, questions, time_allowance_minutes, opens_at, closes_at, created_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Quiz>, sqlx::Error> {
    sqlx::query_as::<_, Quiz>(&format!("SELECT {COLUMNS} FROM quizzes WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn create(pool: &PgPool, quiz: &NewQuiz) -> Result<Quiz, sqlx::Error> {
    sqlx::query_as::<_, Quiz>(&format!(
        "INSERT INTO quizzes (
            id, course_id, title, questions, time_allowance_minutes, opens_at, closes_at, created_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        RETURNING {COLUMNS}"
    ))
    .bind(&quiz.id)
    .bind(&quiz.course_id)
    .bind(&quiz.title)
    .bind(Json(&quiz.questions))
    .bind(quiz.time_allowance_minutes)
    .bind(quiz.opens_at)
    .bind(quiz.closes_at)
    .bind(quiz.created_at)
    .fetch_one(pool)
    .await
}

/// Attempts go with the quiz through `ON DELETE CASCADE`.
pub(crate) async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM quizzes WHERE id = $1").bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_by_course_with_stats(
    pool: &PgPool,
    course_id: &str,
) -> Result<Vec<QuizSummary>, sqlx::Error> {
    sqlx::query_as::<_, QuizSummary>(
        "SELECT q.id, q.course_id, q.title, q.questions, q.time_allowance_minutes,
                q.opens_at, q.closes_at, q.created_at,
                COUNT(a.id)::BIGINT AS submission_count,
                AVG(a.score)::DOUBLE PRECISION AS average_score
         FROM quizzes q
         LEFT JOIN quiz_attempts a ON a.quiz_id = q.id AND a.state = $2
         WHERE q.course_id = $1
         GROUP BY q.id
         ORDER BY q.opens_at DESC, q.id",
    )
    .bind(course_id)
    .bind(AttemptState::Graded)
    .fetch_all(pool)
    .await
}
