//! The authentication gate as an axum extractor.
//!
//! Any handler that takes [`Authenticated`] is protected: axum runs the
//! extractor first, and a missing, malformed or rejected bearer token
//! short-circuits with 401 before the handler body executes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use waypoint_session::{AuthError, Claims};
use waypoint_store::{TokenStore, UserDirectory};

use crate::http::{ApiError, AppState};

/// Claims of the caller's verified access token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Claims);

impl<S, D> FromRequestParts<AppState<S, D>> for Authenticated
where
    S: TokenStore,
    D: UserDirectory,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S, D>,
    ) -> Result<Self, Self::Rejection> {
        let header = match parts.headers.get(AUTHORIZATION) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| AuthError::MalformedHeader)?
                    .to_owned(),
            ),
            None => None,
        };

        let claims = state.gate.authorize(header.as_deref()).await?;
        tracing::debug!(user_id = %claims.user_id, "request authenticated");
        Ok(Self(claims))
    }
}
