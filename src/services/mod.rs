pub(crate) mod attempts;
pub(crate) mod fanout;
pub(crate) mod judge;
pub(crate) mod quizzes;
pub(crate) mod scoring;

use crate::core::security::Caller;
use crate::db::types::Role;
use crate::repositories::{Store, StoreError};

/// Admins, or the instructor who owns the course.
pub(crate) async fn is_course_staff(
    store: &dyn Store,
    course_id: &str,
    caller: &Caller,
) -> Result<bool, StoreError> {
    if !caller.role.is_staff() {
        return Ok(false);
    }
    if caller.role == Role::Admin {
        return Ok(true);
    }
    Ok(store.find_course(course_id).await?.is_some_and(|course| course.instructor_id == caller.id))
}
