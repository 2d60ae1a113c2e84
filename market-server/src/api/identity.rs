//! Caller identity extractor.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user id in the `x-user-id` header. Requests without it are rejected.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;

pub struct CurrentUser(pub String);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(v.to_string()))
            .ok_or(AppError::Unauthorized)
    }
}
