//! The HTTP API.
//!
//! Handlers only decode the body, call the engine, and map the result to
//! a status code. Errors are always `{"error": "<message>"}`.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use waypoint_presence::PresenceError;
use waypoint_protocol::{
    FriendRequest, LocationRequest, LocationView, LoginRequest, LoginResponse, LogoutRequest,
    LogoutResponse, RefreshRequest, RefreshResponse, RegisterRequest, UpdateUserRequest, UserId,
    UserListQuery, UserProfile, UserSummary,
};
use waypoint_session::{AuthError, Claims};
use waypoint_store::{TokenStore, UserDirectory};

use crate::gate::Authenticated;
use crate::server::ServerState;

pub(crate) type AppState<S, D> = Arc<ServerState<S, D>>;

pub(crate) fn router<S, D>(state: AppState<S, D>) -> Router
where
    S: TokenStore,
    D: UserDirectory,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login::<S, D>))
        .route("/api/refresh-token", post(refresh::<S, D>))
        .route("/api/logout", post(logout::<S, D>))
        .route("/api/online-users", get(online_users::<S, D>))
        .route("/api/register", post(register::<S, D>))
        .route("/api/me", get(me))
        .route("/api/users", get(list_users::<S, D>))
        .route(
            "/api/users/{id}",
            get(get_user::<S, D>)
                .put(update_user::<S, D>)
                .delete(delete_user::<S, D>),
        )
        .route("/api/users/friends", post(add_friend::<S, D>))
        .route("/api/users/location", post(add_location::<S, D>))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An error response: a status code and a message for the client.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<PresenceError> for ApiError {
    fn from(e: PresenceError) -> Self {
        match e {
            PresenceError::MalformedInput(_) => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
            PresenceError::AuthenticationFailed(_) => {
                Self::new(StatusCode::UNAUTHORIZED, e.to_string())
            }
            PresenceError::UserNotFound(_) => Self::new(StatusCode::NOT_FOUND, e.to_string()),
            PresenceError::Forbidden(_) => Self::new(StatusCode::FORBIDDEN, e.to_string()),
            PresenceError::Conflict(_) => Self::new(StatusCode::CONFLICT, e.to_string()),
            PresenceError::DependencyUnavailable(_) => {
                tracing::error!(error = %e, "request failed on a dependency");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.body_text())
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /api/login
async fn login<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = body?;
    Ok(Json(state.engine.login(req).await?))
}

/// POST /api/refresh-token
async fn refresh<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let Json(req) = body?;
    Ok(Json(state.engine.refresh(req).await?))
}

/// POST /api/logout
async fn logout<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    body: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let Json(req) = body?;
    Ok(Json(state.engine.logout(req).await?))
}

/// GET /api/online-users
async fn online_users<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
) -> Result<Json<Vec<UserId>>, ApiError> {
    Ok(Json(state.engine.online_users().await?))
}

/// POST /api/register
async fn register<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let Json(req) = body?;
    let user = state.engine.register(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/me: what the caller's access token says.
async fn me(Authenticated(claims): Authenticated) -> Json<Claims> {
    Json(claims)
}

/// POST /api/users/friends
async fn add_friend<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    Authenticated(claims): Authenticated,
    body: Result<Json<FriendRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(req) = body?;
    state.engine.add_friend(claims.user_id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "user_id": claims.user_id, "friend_id": req.friend_id })),
    ))
}

/// POST /api/users/location
async fn add_location<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    Authenticated(claims): Authenticated,
    body: Result<Json<LocationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LocationView>), ApiError> {
    let Json(req) = body?;
    let location = state.engine.add_location(claims.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(location)))
}

/// GET /api/users?page=&pageSize=
async fn list_users<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    _caller: Authenticated,
    query: Result<Query<UserListQuery>, QueryRejection>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.engine.list_users(query).await?))
}

/// GET /api/users/{id}
async fn get_user<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    _caller: Authenticated,
    id: Result<Path<u64>, PathRejection>,
) -> Result<Json<UserSummary>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.engine.user(UserId(id)).await?))
}

/// PUT /api/users/{id}
async fn update_user<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    Authenticated(claims): Authenticated,
    id: Result<Path<u64>, PathRejection>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserSummary>, ApiError> {
    let Path(id) = id?;
    let Json(req) = body?;
    Ok(Json(
        state
            .engine
            .update_user(claims.user_id, UserId(id), req)
            .await?,
    ))
}

/// DELETE /api/users/{id}
async fn delete_user<S: TokenStore, D: UserDirectory>(
    State(state): State<AppState<S, D>>,
    Authenticated(claims): Authenticated,
    id: Result<Path<u64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.engine.delete_user(claims.user_id, UserId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_error_status_mapping() {
        let cases = [
            (PresenceError::MalformedInput("x".into()), StatusCode::BAD_REQUEST),
            (PresenceError::AuthenticationFailed("x".into()), StatusCode::UNAUTHORIZED),
            (PresenceError::UserNotFound(UserId(3)), StatusCode::NOT_FOUND),
            (PresenceError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (PresenceError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                PresenceError::DependencyUnavailable("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_dependency_error_hides_details() {
        let err = ApiError::from(PresenceError::DependencyUnavailable(
            "redis://10.0.0.3 refused".into(),
        ));
        assert!(!err.message.contains("redis"));
    }

    #[test]
    fn test_auth_error_is_unauthorized() {
        let err = ApiError::from(AuthError::MalformedHeader);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "malformed authorization header");
    }
}
