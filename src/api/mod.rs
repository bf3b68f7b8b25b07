pub(crate) mod attempts;
pub(crate) mod errors;
pub(crate) mod events;
pub(crate) mod guards;
pub(crate) mod handlers;
pub(crate) mod quizzes;
pub(crate) mod router;
