use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::{header, request::Parts, HeaderMap};

use crate::api::errors::ApiError;
use crate::core::{
    security::{self, Caller},
    state::AppState,
};

/// Caller identity taken from a bearer token issued by the identity service.
pub(crate) struct CurrentUser(pub(crate) Caller);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to access application state"))?;

        let token = bearer_token(&parts.headers)
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        authenticate(&app_state, token).map(CurrentUser)
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

pub(crate) fn authenticate(state: &AppState, token: &str) -> Result<Caller, ApiError> {
    security::verify_token(token, state.settings())
        .map(Caller::from)
        .map_err(|_| ApiError::Unauthorized("Invalid authentication credentials"))
}
