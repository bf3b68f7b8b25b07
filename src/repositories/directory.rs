use sqlx::PgPool;

use crate::db::models::{Course, StudentProfile};

pub(crate) async fn find_course(pool: &PgPool, id: &str) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>("SELECT id, name, instructor_id FROM courses WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn is_enrolled(
    pool: &PgPool,
    course_id: &str,
    student_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(
            SELECT 1 FROM course_enrollments WHERE course_id = $1 AND student_id = $2
        )",
    )
    .bind(course_id)
    .bind(student_id)
    .fetch_one(pool)
    .await
}

pub(crate) async fn list_enrolled_students(
    pool: &PgPool,
    course_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT student_id FROM course_enrollments WHERE course_id = $1 ORDER BY student_id",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_student_profile(
    pool: &PgPool,
    id: &str,
) -> Result<Option<StudentProfile>, sqlx::Error> {
    sqlx::query_as::<_, StudentProfile>(
        "SELECT id, full_name, student_number FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}
