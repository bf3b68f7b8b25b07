use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::{metrics, security::Caller};
use crate::db::models::{Attempt, IntegrityEntry, Quiz};
use crate::repositories::{GradeUpdate, NewAttempt, Store, StoreError};
use crate::services::fanout::{
    publish_or_warn, AttemptGraded, Channel, DataChanged, EventPublisher, QuizEvent, StatsUpdated,
};
use crate::services::is_course_staff;
use crate::services::scoring::{RawAnswer, ScoringEngine};

pub(crate) const OVERRIDE_MARKER: &str = "(Regraded) ";

#[derive(Debug, Error)]
pub(crate) enum AttemptError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("quiz is not open for this action")]
    OutsideWindow,
    #[error("attempt has already been graded")]
    AlreadyGraded,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AttemptPolicy {
    /// How long after `closes_at` an already started attempt may still be submitted.
    pub(crate) submit_grace: time::Duration,
    pub(crate) max_integrity_event_len: usize,
}

/// Attempt lifecycle: start, submit, override, integrity log, reads.
#[derive(Clone)]
pub(crate) struct AttemptService {
    store: Arc<dyn Store>,
    scoring: ScoringEngine,
    publisher: Arc<dyn EventPublisher>,
    policy: AttemptPolicy,
}

impl AttemptService {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        scoring: ScoringEngine,
        publisher: Arc<dyn EventPublisher>,
        policy: AttemptPolicy,
    ) -> Self {
        Self { store, scoring, publisher, policy }
    }

    /// Returns the caller's attempt for the quiz, creating it on first call.
    pub(crate) async fn start(
        &self,
        quiz_id: &str,
        student_id: &str,
        now: OffsetDateTime,
    ) -> Result<Attempt, AttemptError> {
        let quiz = self.store.find_quiz(quiz_id).await?.ok_or(AttemptError::NotFound("quiz"))?;
        if !quiz.is_open_at(now) {
            return Err(AttemptError::OutsideWindow);
        }
        if !self.store.is_enrolled(&quiz.course_id, student_id).await? {
            return Err(AttemptError::Forbidden("not enrolled in this course"));
        }

        let course =
            self.store.find_course(&quiz.course_id).await?.ok_or(AttemptError::NotFound("course"))?;
        let profile = self.store.student_profile(student_id).await?;
        let (student_name, student_number) = match profile {
            Some(profile) => (profile.full_name, profile.student_number),
            None => (student_id.to_string(), None),
        };

        let upserted = self
            .store
            .insert_attempt_if_absent(NewAttempt {
                id: Uuid::new_v4().to_string(),
                quiz_id: quiz.id.clone(),
                student_id: student_id.to_string(),
                course_id: quiz.course_id.clone(),
                student_name,
                student_number,
                course_name: course.name,
                created_at: now,
            })
            .await?;

        if upserted.attempt.is_graded() {
            return Err(AttemptError::AlreadyGraded);
        }

        metrics::attempt_started(upserted.created);
        tracing::info!(
            attempt_id = %upserted.attempt.id,
            quiz_id = %quiz.id,
            student_id,
            created = upserted.created,
            "Quiz attempt started"
        );

        Ok(upserted.attempt)
    }

    pub(crate) async fn submit(
        &self,
        attempt_id: &str,
        student_id: &str,
        answers: &[RawAnswer],
        now: OffsetDateTime,
    ) -> Result<Attempt, AttemptError> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.student_id != student_id {
            return Err(AttemptError::Forbidden("attempt belongs to another student"));
        }
        if attempt.is_graded() {
            return Err(AttemptError::AlreadyGraded);
        }

        let quiz =
            self.store.find_quiz(&attempt.quiz_id).await?.ok_or(AttemptError::NotFound("quiz"))?;
        // A deadline past the representable range never expires.
        let deadline = quiz.closes_at.checked_add(self.policy.submit_grace);
        if deadline.is_some_and(|deadline| now > deadline) {
            return Err(AttemptError::OutsideWindow);
        }

        let scored = self.scoring.score(&quiz, answers).await;
        let score = scored.score;

        // Guarded on the attempt still being in progress; a concurrent submit
        // that got there first wins.
        let graded = self
            .store
            .record_grade(
                attempt_id,
                GradeUpdate { answers: scored.results, score, submitted_at: now },
            )
            .await?
            .ok_or(AttemptError::AlreadyGraded)?;

        metrics::attempt_graded("scoring", score);
        tracing::info!(attempt_id, quiz_id = %quiz.id, student_id, score, "Quiz attempt graded");

        self.announce_grade(&graded, "attempt_graded").await;
        Ok(graded)
    }

    pub(crate) async fn override_score(
        &self,
        attempt_id: &str,
        caller: &Caller,
        score: i32,
        feedback: &str,
        now: OffsetDateTime,
    ) -> Result<Attempt, AttemptError> {
        if !(0..=100).contains(&score) {
            return Err(AttemptError::Invalid("score must be between 0 and 100".to_string()));
        }

        let attempt = self.load_attempt(attempt_id).await?;
        if !is_course_staff(self.store.as_ref(), &attempt.course_id, caller).await? {
            return Err(AttemptError::Forbidden("only the course instructor can regrade"));
        }

        let feedback = format!("{OVERRIDE_MARKER}{}", feedback.trim());
        let updated = self
            .store
            .override_grade(attempt_id, score, feedback, now)
            .await?
            .ok_or(AttemptError::NotFound("attempt"))?;

        metrics::attempt_graded("override", score);
        tracing::info!(
            attempt_id,
            instructor_id = %caller.id,
            previous_score = ?attempt.score,
            score,
            "Quiz attempt regraded"
        );

        self.announce_grade(&updated, "attempt_regraded").await;
        Ok(updated)
    }

    /// Appends to the attempt's integrity log. The log is append-only and
    /// accepted in any state.
    pub(crate) async fn log_integrity_event(
        &self,
        attempt_id: &str,
        student_id: &str,
        event: &str,
        now: OffsetDateTime,
    ) -> Result<(), AttemptError> {
        let event = event.trim();
        if event.is_empty() || event.chars().count() > self.policy.max_integrity_event_len {
            return Err(AttemptError::Invalid(format!(
                "event must be 1 to {} characters",
                self.policy.max_integrity_event_len
            )));
        }

        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.student_id != student_id {
            return Err(AttemptError::Forbidden("attempt belongs to another student"));
        }

        let entry = IntegrityEntry { timestamp: now, event: event.to_string() };
        if !self.store.append_integrity_event(attempt_id, entry).await? {
            return Err(AttemptError::NotFound("attempt"));
        }

        tracing::info!(attempt_id, student_id, event, "Integrity event recorded");
        Ok(())
    }

    pub(crate) async fn list_attempts(
        &self,
        quiz_id: &str,
        caller: &Caller,
    ) -> Result<Vec<Attempt>, AttemptError> {
        let quiz = self.store.find_quiz(quiz_id).await?.ok_or(AttemptError::NotFound("quiz"))?;
        if !is_course_staff(self.store.as_ref(), &quiz.course_id, caller).await? {
            return Err(AttemptError::Forbidden("only course staff can list attempts"));
        }
        Ok(self.store.list_quiz_attempts(quiz_id).await?)
    }

    pub(crate) async fn own_attempt(
        &self,
        quiz_id: &str,
        student_id: &str,
    ) -> Result<(Quiz, Attempt), AttemptError> {
        let quiz = self.store.find_quiz(quiz_id).await?.ok_or(AttemptError::NotFound("quiz"))?;
        let attempt = self
            .store
            .find_student_attempt(quiz_id, student_id)
            .await?
            .ok_or(AttemptError::NotFound("attempt"))?;
        Ok((quiz, attempt))
    }

    async fn load_attempt(&self, attempt_id: &str) -> Result<Attempt, AttemptError> {
        self.store.find_attempt(attempt_id).await?.ok_or(AttemptError::NotFound("attempt"))
    }

    async fn announce_grade(&self, attempt: &Attempt, reason: &'static str) {
        let Some(score) = attempt.score else {
            return;
        };
        let publisher = self.publisher.as_ref();

        publish_or_warn(
            publisher,
            Channel::Student(attempt.student_id.clone()),
            QuizEvent::AttemptGraded(AttemptGraded {
                attempt_id: attempt.id.clone(),
                quiz_id: attempt.quiz_id.clone(),
                student_id: attempt.student_id.clone(),
                course_id: attempt.course_id.clone(),
                score,
            }),
        )
        .await;

        match self.store.quiz_stats(&attempt.quiz_id).await {
            Ok(stats) => {
                publish_or_warn(
                    publisher,
                    Channel::Course(attempt.course_id.clone()),
                    QuizEvent::StatsUpdated(StatsUpdated {
                        quiz_id: attempt.quiz_id.clone(),
                        course_id: attempt.course_id.clone(),
                        submission_count: stats.submission_count,
                        average_score: stats.average_score,
                    }),
                )
                .await;
            }
            Err(err) => {
                tracing::warn!(quiz_id = %attempt.quiz_id, error = %err, "Failed to recompute quiz stats");
            }
        }

        publish_or_warn(
            publisher,
            Channel::Global,
            QuizEvent::DataChanged(DataChanged { reason, course_id: attempt.course_id.clone() }),
        )
        .await;
    }
}
