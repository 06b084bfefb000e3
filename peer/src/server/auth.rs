//! Bearer token authentication for entity routes.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::AppState;
use crate::error::AppError;
use crate::store::LocalStore;

/// Proof that a request carried the server's bearer token.
///
/// The header must be exactly `Bearer <token>`; anything else is rejected
/// before the handler runs, so an unauthorized request never touches the
/// store.
#[derive(Debug, Clone, Copy)]
pub struct Authorized;

impl<S: LocalStore> FromRequestParts<AppState<S>> for Authorized {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "));

        match token {
            Some(token) if !token.is_empty() && token == state.token.as_ref() => Ok(Authorized),
            Some(_) => {
                tracing::debug!("Rejected request with wrong bearer token");
                Err(AppError::Unauthorized)
            }
            None => Err(AppError::Unauthorized),
        }
    }
}
