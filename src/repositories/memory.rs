use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::types::Json;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::db::models::{Attempt, Course, IntegrityEntry, Quiz, QuizSummary, StudentProfile};
use crate::db::types::AttemptState;

use super::{
    AttemptRepository, Directory, GradeUpdate, NewAttempt, NewQuiz, QuizRepository, QuizStats,
    Store, StoreError, UpsertedAttempt,
};

/// Process-local store mirroring the Postgres constraints the lifecycle
/// relies on: one attempt per (quiz, student) and grade-once guards.
#[derive(Default)]
pub(crate) struct InMemoryStore {
    quizzes: RwLock<HashMap<String, Quiz>>,
    attempts: RwLock<HashMap<String, Attempt>>,
    courses: RwLock<HashMap<String, Course>>,
    enrollments: RwLock<HashSet<(String, String)>>,
    profiles: RwLock<HashMap<String, StudentProfile>>,
}

impl InMemoryStore {
    pub(crate) async fn add_course(&self, id: &str, name: &str, instructor_id: &str) {
        self.courses.write().await.insert(
            id.to_string(),
            Course {
                id: id.to_string(),
                name: name.to_string(),
                instructor_id: instructor_id.to_string(),
            },
        );
    }

    pub(crate) async fn enroll(
        &self,
        course_id: &str,
        student_id: &str,
        full_name: &str,
        student_number: Option<&str>,
    ) {
        self.enrollments.write().await.insert((course_id.to_string(), student_id.to_string()));
        self.profiles.write().await.insert(
            student_id.to_string(),
            StudentProfile {
                id: student_id.to_string(),
                full_name: full_name.to_string(),
                student_number: student_number.map(str::to_string),
            },
        );
    }

    pub(crate) async fn attempt_count(&self) -> usize {
        self.attempts.read().await.len()
    }
}

#[async_trait]
impl QuizRepository for InMemoryStore {
    async fn find_quiz(&self, quiz_id: &str) -> Result<Option<Quiz>, StoreError> {
        Ok(self.quizzes.read().await.get(quiz_id).cloned())
    }

    async fn create_quiz(&self, quiz: NewQuiz) -> Result<Quiz, StoreError> {
        let stored = Quiz {
            id: quiz.id,
            course_id: quiz.course_id,
            title: quiz.title,
            questions: Json(quiz.questions),
            time_allowance_minutes: quiz.time_allowance_minutes,
            opens_at: quiz.opens_at,
            closes_at: quiz.closes_at,
            created_at: quiz.created_at,
        };
        self.quizzes.write().await.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_quiz(&self, quiz_id: &str) -> Result<bool, StoreError> {
        let removed = self.quizzes.write().await.remove(quiz_id).is_some();
        if removed {
            self.attempts.write().await.retain(|_, attempt| attempt.quiz_id != quiz_id);
        }
        Ok(removed)
    }

    async fn list_course_quizzes(&self, course_id: &str) -> Result<Vec<QuizSummary>, StoreError> {
        let quizzes: Vec<Quiz> = self
            .quizzes
            .read()
            .await
            .values()
            .filter(|quiz| quiz.course_id == course_id)
            .cloned()
            .collect();

        let mut summaries = Vec::with_capacity(quizzes.len());
        for quiz in quizzes {
            let stats = self.quiz_stats(&quiz.id).await?;
            summaries.push(QuizSummary {
                quiz,
                submission_count: stats.submission_count,
                average_score: stats.average_score,
            });
        }
        summaries.sort_by(|a, b| b.quiz.opens_at.cmp(&a.quiz.opens_at));
        Ok(summaries)
    }
}

#[async_trait]
impl AttemptRepository for InMemoryStore {
    async fn insert_attempt_if_absent(
        &self,
        attempt: NewAttempt,
    ) -> Result<UpsertedAttempt, StoreError> {
        let mut attempts = self.attempts.write().await;
        if let Some(existing) = attempts
            .values()
            .find(|row| row.quiz_id == attempt.quiz_id && row.student_id == attempt.student_id)
        {
            return Ok(UpsertedAttempt { attempt: existing.clone(), created: false });
        }

        let stored = Attempt {
            id: attempt.id,
            quiz_id: attempt.quiz_id,
            student_id: attempt.student_id,
            course_id: attempt.course_id,
            student_name: attempt.student_name,
            student_number: attempt.student_number,
            course_name: attempt.course_name,
            state: AttemptState::InProgress,
            answers: Json(Vec::new()),
            score: None,
            feedback: None,
            integrity_log: Json(Vec::new()),
            submitted_at: None,
            created_at: attempt.created_at,
            updated_at: attempt.created_at,
        };
        attempts.insert(stored.id.clone(), stored.clone());
        Ok(UpsertedAttempt { attempt: stored, created: true })
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        Ok(self.attempts.read().await.get(attempt_id).cloned())
    }

    async fn find_student_attempt(
        &self,
        quiz_id: &str,
        student_id: &str,
    ) -> Result<Option<Attempt>, StoreError> {
        Ok(self
            .attempts
            .read()
            .await
            .values()
            .find(|row| row.quiz_id == quiz_id && row.student_id == student_id)
            .cloned())
    }

    async fn list_quiz_attempts(&self, quiz_id: &str) -> Result<Vec<Attempt>, StoreError> {
        let mut rows: Vec<Attempt> = self
            .attempts
            .read()
            .await
            .values()
            .filter(|row| row.quiz_id == quiz_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn record_grade(
        &self,
        attempt_id: &str,
        update: GradeUpdate,
    ) -> Result<Option<Attempt>, StoreError> {
        let mut attempts = self.attempts.write().await;
        let Some(row) = attempts.get_mut(attempt_id) else {
            return Ok(None);
        };
        if row.state != AttemptState::InProgress {
            return Ok(None);
        }

        row.state = AttemptState::Graded;
        row.answers = Json(update.answers);
        row.score = Some(update.score);
        row.submitted_at = Some(update.submitted_at);
        row.updated_at = update.submitted_at;
        Ok(Some(row.clone()))
    }

    async fn override_grade(
        &self,
        attempt_id: &str,
        score: i32,
        feedback: String,
        now: OffsetDateTime,
    ) -> Result<Option<Attempt>, StoreError> {
        let mut attempts = self.attempts.write().await;
        let Some(row) = attempts.get_mut(attempt_id) else {
            return Ok(None);
        };

        row.state = AttemptState::Graded;
        row.score = Some(score);
        row.feedback = Some(feedback);
        row.submitted_at.get_or_insert(now);
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn append_integrity_event(
        &self,
        attempt_id: &str,
        entry: IntegrityEntry,
    ) -> Result<bool, StoreError> {
        let mut attempts = self.attempts.write().await;
        let Some(row) = attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        row.integrity_log.0.push(entry);
        Ok(true)
    }

    async fn quiz_stats(&self, quiz_id: &str) -> Result<QuizStats, StoreError> {
        let attempts = self.attempts.read().await;
        let scores: Vec<i32> = attempts
            .values()
            .filter(|row| row.quiz_id == quiz_id && row.state == AttemptState::Graded)
            .filter_map(|row| row.score)
            .collect();

        let submission_count = scores.len() as i64;
        let average_score = (!scores.is_empty()).then(|| {
            scores.iter().map(|score| f64::from(*score)).sum::<f64>() / scores.len() as f64
        });
        Ok(QuizStats { submission_count, average_score })
    }
}

#[async_trait]
impl Directory for InMemoryStore {
    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError> {
        Ok(self.courses.read().await.get(course_id).cloned())
    }

    async fn is_enrolled(&self, course_id: &str, student_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .enrollments
            .read()
            .await
            .contains(&(course_id.to_string(), student_id.to_string())))
    }

    async fn enrolled_students(&self, course_id: &str) -> Result<Vec<String>, StoreError> {
        let mut students: Vec<String> = self
            .enrollments
            .read()
            .await
            .iter()
            .filter(|(course, _)| course == course_id)
            .map(|(_, student)| student.clone())
            .collect();
        students.sort();
        Ok(students)
    }

    async fn student_profile(
        &self,
        student_id: &str,
    ) -> Result<Option<StudentProfile>, StoreError> {
        Ok(self.profiles.read().await.get(student_id).cloned())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
