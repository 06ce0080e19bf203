//! JSON bodies of the HTTP session endpoints.
//!
//! These are plain data. Validation (coordinate ranges, empty fields)
//! happens in the presence engine, not during deserialization, so a
//! well-formed but invalid body still reaches the engine and gets a
//! proper `MalformedInput` error instead of a generic decode failure.

use serde::{Deserialize, Serialize};

use crate::UserId;

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// `POST /api/login`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserProfile,
}

/// What a client learns about itself after login or registration.
///
/// `friends` holds e-mail addresses, not ids: that's the snapshot the
/// access token carries too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub home_address: String,
    pub friends: Vec<String>,
    pub locations: Vec<LocationView>,
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// How a user feels about a saved place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LocationKind {
    #[default]
    Wish,
    NotGood,
    Good,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationView {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "type")]
    pub kind: LocationKind,
}

/// `POST /api/users/location`. The owner comes from the bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "type", default)]
    pub kind: LocationKind,
}

// ---------------------------------------------------------------------------
// Refresh / logout
// ---------------------------------------------------------------------------

/// `POST /api/refresh-token`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub user_id: UserId,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// `POST /api/logout`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub user_id: UserId,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// `POST /api/register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub home_address: String,
    #[serde(default)]
    pub share_address: bool,
}

/// `POST /api/users/friends`. The other half of the pair is the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub friend_id: UserId,
}

/// `PUT /api/users/{id}`. E-mail and password can't be changed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub name: String,
    #[serde(default)]
    pub home_address: String,
    #[serde(default)]
    pub share_address: bool,
}

/// `GET /api/users?page=2&pageSize=20`. Pages start at 1; missing or zero
/// values fall back to the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserListQuery {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default, rename = "pageSize")]
    pub page_size: Option<u64>,
}

impl UserListQuery {
    pub const DEFAULT_PAGE_SIZE: u64 = 10;
    pub const MAX_PAGE_SIZE: u64 = 100;

    /// `(offset, limit)` for the directory.
    pub fn window(&self) -> (usize, usize) {
        let page = self.page.filter(|p| *p >= 1).unwrap_or(1);
        let size = self
            .page_size
            .filter(|s| *s >= 1)
            .unwrap_or(Self::DEFAULT_PAGE_SIZE)
            .min(Self::MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(size);
        (
            usize::try_from(offset).unwrap_or(usize::MAX),
            usize::try_from(size).unwrap_or(usize::MAX),
        )
    }
}

/// A user as other users see them: no address, no locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub friends: Vec<FriendSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
}
