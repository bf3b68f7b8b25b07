use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attemptstate", rename_all = "snake_case")]
pub(crate) enum AttemptState {
    InProgress,
    Graded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum QuestionKind {
    MultipleChoice,
    Essay,
}

/// Caller role as asserted by the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub(crate) fn is_staff(self) -> bool {
        matches!(self, Self::Instructor | Self::Admin)
    }
}
