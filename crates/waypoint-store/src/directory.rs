//! The user directory: accounts, friendships, saved locations.
//!
//! The session core only *reads* from it (look a user up, list their
//! friends). Writes exist for registration and the protected user
//! endpoints. A relational backend would implement [`UserDirectory`]
//! over its tables; [`MemoryDirectory`] is the in-process stand-in.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use tokio::sync::RwLock;
use waypoint_protocol::{LocationKind, LocationView, UserId};

use crate::DirectoryError;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A user account as the directory stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// PHC-format Argon2 hash. Never leaves the server.
    pub password_hash: String,
    pub home_address: String,
    pub share_address: bool,
    pub locations: Vec<LocationRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationRecord {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub kind: LocationKind,
}

impl From<&LocationRecord> for LocationView {
    fn from(record: &LocationRecord) -> Self {
        LocationView {
            id: record.id,
            latitude: record.latitude,
            longitude: record.longitude,
            kind: record.kind,
        }
    }
}

/// Everything needed to create an account. The id is assigned by the
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub home_address: String,
    pub share_address: bool,
}

/// The fields a user may change about themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserUpdate {
    pub name: String,
    pub home_address: String,
    pub share_address: bool,
}

// ---------------------------------------------------------------------------
// UserDirectory
// ---------------------------------------------------------------------------

/// Read/write access to user, friendship and location records.
pub trait UserDirectory: Send + Sync + 'static {
    /// E-mail comparison is ASCII case-insensitive.
    fn find_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<UserRecord>, DirectoryError>> + Send;

    fn find_by_id(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<UserRecord>, DirectoryError>> + Send;

    /// Up to `limit` users in ascending id order, skipping the first
    /// `offset`.
    fn list_users(
        &self,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<UserRecord>, DirectoryError>> + Send;

    /// The user's friends, in ascending id order.
    fn friends_of(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<UserRecord>, DirectoryError>> + Send;

    /// # Errors
    /// [`DirectoryError::Conflict`] if the e-mail is taken.
    fn create_user(
        &self,
        user: NewUser,
    ) -> impl Future<Output = Result<UserRecord, DirectoryError>> + Send;

    /// Makes `a` and `b` friends of each other. Both directions are
    /// written together or not at all.
    ///
    /// # Errors
    /// - [`DirectoryError::Invalid`] if `a == b`
    /// - [`DirectoryError::NotFound`] if either user doesn't exist
    /// - [`DirectoryError::Conflict`] if they're already friends
    fn add_friendship(
        &self,
        a: UserId,
        b: UserId,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    fn add_location(
        &self,
        user_id: UserId,
        latitude: f64,
        longitude: f64,
        kind: LocationKind,
    ) -> impl Future<Output = Result<LocationRecord, DirectoryError>> + Send;

    /// # Errors
    /// [`DirectoryError::NotFound`] if the user doesn't exist.
    fn update_user(
        &self,
        user_id: UserId,
        update: UserUpdate,
    ) -> impl Future<Output = Result<UserRecord, DirectoryError>> + Send;

    /// Removes the user together with every friendship they are part of.
    ///
    /// # Errors
    /// [`DirectoryError::NotFound`] if the user doesn't exist.
    fn delete_user(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DirectoryState {
    users: BTreeMap<UserId, UserRecord>,
    /// Directed edges. A friendship is always both `(a, b)` and `(b, a)`.
    friendships: BTreeSet<(UserId, UserId)>,
    last_user_id: u64,
    last_location_id: u64,
}

/// An in-process [`UserDirectory`].
///
/// Ids are assigned from 1 upward in creation order.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn list_users(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserRecord>, DirectoryError> {
        let state = self.state.read().await;
        Ok(state.users.values().skip(offset).take(limit).cloned().collect())
    }

    async fn friends_of(&self, user_id: UserId) -> Result<Vec<UserRecord>, DirectoryError> {
        let state = self.state.read().await;
        let friends = state
            .friendships
            .range((user_id, UserId(0))..=(user_id, UserId(u64::MAX)))
            .filter_map(|(_, friend)| state.users.get(friend).cloned())
            .collect();
        Ok(friends)
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(DirectoryError::Conflict(format!(
                "e-mail {} is already registered",
                user.email
            )));
        }

        state.last_user_id += 1;
        let record = UserRecord {
            id: UserId(state.last_user_id),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            home_address: user.home_address,
            share_address: user.share_address,
            locations: Vec::new(),
        };
        state.users.insert(record.id, record.clone());

        tracing::info!(user_id = %record.id, "user created");
        Ok(record)
    }

    async fn add_friendship(&self, a: UserId, b: UserId) -> Result<(), DirectoryError> {
        if a == b {
            return Err(DirectoryError::Invalid("cannot befriend yourself".into()));
        }

        // One write guard for both edges, so no reader ever sees half a
        // friendship.
        let mut state = self.state.write().await;
        for id in [a, b] {
            if !state.users.contains_key(&id) {
                return Err(DirectoryError::NotFound(id));
            }
        }
        if state.friendships.contains(&(a, b)) {
            return Err(DirectoryError::Conflict(format!("{a} and {b} are already friends")));
        }

        state.friendships.insert((a, b));
        state.friendships.insert((b, a));
        tracing::info!(%a, %b, "friendship created");
        Ok(())
    }

    async fn add_location(
        &self,
        user_id: UserId,
        latitude: f64,
        longitude: f64,
        kind: LocationKind,
    ) -> Result<LocationRecord, DirectoryError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(DirectoryError::NotFound(user_id))?;

        state.last_location_id += 1;
        let location = LocationRecord {
            id: state.last_location_id,
            latitude,
            longitude,
            kind,
        };
        user.locations.push(location);
        Ok(location)
    }

    async fn update_user(
        &self,
        user_id: UserId,
        update: UserUpdate,
    ) -> Result<UserRecord, DirectoryError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(DirectoryError::NotFound(user_id))?;

        user.name = update.name;
        user.home_address = update.home_address;
        user.share_address = update.share_address;
        Ok(user.clone())
    }

    async fn delete_user(&self, user_id: UserId) -> Result<(), DirectoryError> {
        let mut state = self.state.write().await;
        if state.users.remove(&user_id).is_none() {
            return Err(DirectoryError::NotFound(user_id));
        }
        state.friendships.retain(|(a, b)| *a != user_id && *b != user_id);

        tracing::info!(%user_id, "user deleted");
        Ok(())
    }
}
