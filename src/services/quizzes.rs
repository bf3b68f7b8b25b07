use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::security::Caller;
use crate::db::models::{Question, Quiz, QuizSummary};
use crate::db::types::QuestionKind;
use crate::repositories::{NewQuiz, Store, StoreError};
use crate::services::fanout::{
    publish_or_warn, Channel, DataChanged, EventPublisher, QuizCreated, QuizDeleted, QuizEvent,
};
use crate::services::is_course_staff;
use crate::services::scoring::answers_match;

const MAX_TITLE_LEN: usize = 200;
const MAX_TIME_ALLOWANCE_MINUTES: i32 = 24 * 60;

#[derive(Debug, Error)]
pub(crate) enum QuizError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub(crate) struct QuizDraft {
    pub(crate) course_id: String,
    pub(crate) title: String,
    pub(crate) questions: Vec<Question>,
    pub(crate) time_allowance_minutes: i32,
    /// Defaults to the creation time.
    pub(crate) opens_at: Option<OffsetDateTime>,
    pub(crate) closes_at: OffsetDateTime,
}

#[derive(Clone)]
pub(crate) struct QuizService {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
}

impl QuizService {
    pub(crate) fn new(store: Arc<dyn Store>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    pub(crate) async fn create(
        &self,
        caller: &Caller,
        draft: QuizDraft,
        now: OffsetDateTime,
    ) -> Result<Quiz, QuizError> {
        let opens_at = draft.opens_at.unwrap_or(now);
        let title = draft.title.trim().to_string();
        validate_schedule(&title, draft.time_allowance_minutes, opens_at, draft.closes_at)?;
        let questions = normalize_questions(draft.questions)?;

        if self.store.find_course(&draft.course_id).await?.is_none() {
            return Err(QuizError::NotFound("course"));
        }
        if !is_course_staff(self.store.as_ref(), &draft.course_id, caller).await? {
            return Err(QuizError::Forbidden("only the course instructor can create quizzes"));
        }

        let quiz = self
            .store
            .create_quiz(NewQuiz {
                id: Uuid::new_v4().to_string(),
                course_id: draft.course_id,
                title,
                questions,
                time_allowance_minutes: draft.time_allowance_minutes,
                opens_at,
                closes_at: draft.closes_at,
                created_at: now,
            })
            .await?;

        tracing::info!(
            quiz_id = %quiz.id,
            course_id = %quiz.course_id,
            questions = quiz.questions.0.len(),
            "Quiz created"
        );

        self.announce_created(&quiz).await;

        Ok(quiz)
    }

    /// Course channel first, then each enrolled student's own channel.
    async fn announce_created(&self, quiz: &Quiz) {
        let publisher = self.publisher.as_ref();
        let event = QuizEvent::QuizCreated(QuizCreated {
            quiz_id: quiz.id.clone(),
            course_id: quiz.course_id.clone(),
            title: quiz.title.clone(),
        });
        publish_or_warn(publisher, Channel::Course(quiz.course_id.clone()), event.clone()).await;

        match self.store.enrolled_students(&quiz.course_id).await {
            Ok(students) => {
                for student_id in students {
                    publish_or_warn(publisher, Channel::Student(student_id), event.clone()).await;
                }
            }
            Err(err) => tracing::warn!(
                error = %err,
                quiz_id = %quiz.id,
                "Failed to list enrolled students for quiz announcement"
            ),
        }

        publish_or_warn(
            publisher,
            Channel::Global,
            QuizEvent::DataChanged(DataChanged {
                reason: "quiz_created",
                course_id: quiz.course_id.clone(),
            }),
        )
        .await;
    }

    /// Deletes the quiz together with every attempt on it.
    pub(crate) async fn delete(&self, quiz_id: &str, caller: &Caller) -> Result<(), QuizError> {
        let quiz = self.get(quiz_id).await?;
        if !is_course_staff(self.store.as_ref(), &quiz.course_id, caller).await? {
            return Err(QuizError::Forbidden("only the course instructor can delete quizzes"));
        }
        if !self.store.delete_quiz(quiz_id).await? {
            return Err(QuizError::NotFound("quiz"));
        }

        tracing::info!(quiz_id, course_id = %quiz.course_id, "Quiz deleted");

        let publisher = self.publisher.as_ref();
        publish_or_warn(
            publisher,
            Channel::Course(quiz.course_id.clone()),
            QuizEvent::QuizDeleted(QuizDeleted {
                quiz_id: quiz.id.clone(),
                course_id: quiz.course_id.clone(),
            }),
        )
        .await;
        publish_or_warn(
            publisher,
            Channel::Global,
            QuizEvent::DataChanged(DataChanged { reason: "quiz_deleted", course_id: quiz.course_id }),
        )
        .await;

        Ok(())
    }

    pub(crate) async fn get(&self, quiz_id: &str) -> Result<Quiz, QuizError> {
        self.store.find_quiz(quiz_id).await?.ok_or(QuizError::NotFound("quiz"))
    }

    /// Whether the caller may see grading references for the course.
    pub(crate) async fn can_manage(
        &self,
        course_id: &str,
        caller: &Caller,
    ) -> Result<bool, QuizError> {
        Ok(is_course_staff(self.store.as_ref(), course_id, caller).await?)
    }

    pub(crate) async fn list_for_course(
        &self,
        course_id: &str,
    ) -> Result<Vec<QuizSummary>, QuizError> {
        if self.store.find_course(course_id).await?.is_none() {
            return Err(QuizError::NotFound("course"));
        }
        Ok(self.store.list_course_quizzes(course_id).await?)
    }
}

fn validate_schedule(
    title: &str,
    time_allowance_minutes: i32,
    opens_at: OffsetDateTime,
    closes_at: OffsetDateTime,
) -> Result<(), QuizError> {
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(QuizError::Invalid(format!("title must be 1 to {MAX_TITLE_LEN} characters")));
    }
    if !(1..=MAX_TIME_ALLOWANCE_MINUTES).contains(&time_allowance_minutes) {
        return Err(QuizError::Invalid(format!(
            "time allowance must be 1 to {MAX_TIME_ALLOWANCE_MINUTES} minutes"
        )));
    }
    if closes_at <= opens_at {
        return Err(QuizError::Invalid("quiz must close after it opens".to_string()));
    }
    Ok(())
}

/// Assigns ids to questions that came without one and checks every
/// question can actually be graded.
fn normalize_questions(questions: Vec<Question>) -> Result<Vec<Question>, QuizError> {
    if questions.is_empty() {
        return Err(QuizError::Invalid("quiz needs at least one question".to_string()));
    }
    let mut seen = HashSet::with_capacity(questions.len());
    let mut normalized = Vec::with_capacity(questions.len());

    for (index, mut question) in questions.into_iter().enumerate() {
        let position = index + 1;
        question.id = question.id.trim().to_string();
        if question.id.is_empty() {
            question.id = Uuid::new_v4().to_string();
        }
        if !seen.insert(question.id.clone()) {
            return Err(QuizError::Invalid(format!("question {position} repeats id {}", question.id)));
        }
        if question.prompt.trim().is_empty() {
            return Err(QuizError::Invalid(format!("question {position} has no prompt")));
        }

        match question.kind {
            QuestionKind::MultipleChoice => {
                if question.options.len() < 2 {
                    return Err(QuizError::Invalid(format!(
                        "question {position} needs at least two options"
                    )));
                }
                if !question
                    .options
                    .iter()
                    .any(|option| answers_match(option, &question.grading_reference))
                {
                    return Err(QuizError::Invalid(format!(
                        "question {position} answer is not one of its options"
                    )));
                }
            }
            QuestionKind::Essay => {
                if question.grading_reference.trim().is_empty() {
                    return Err(QuizError::Invalid(format!("question {position} has no rubric")));
                }
                question.options.clear();
            }
        }
        normalized.push(question);
    }

    Ok(normalized)
}
