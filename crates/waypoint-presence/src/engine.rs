//! The presence engine: login, token rotation, logout, and fan-out.
//!
//! # Flow
//!
//! ```text
//! login ──→ verify secret ──→ mint tokens ──→ store refresh record
//!                                              │
//!                                              ▼
//!                                         mark online ──→ push to live friends
//!
//! live connection:  attach ──→ [relay, relay, ...] ──→ detach
//! ```
//!
//! The engine owns the one [`ConnectionRegistry`] in the process. Every
//! component that needs to reach a live connection goes through here.
//!
//! # Delivery
//!
//! Pushes are best-effort. Each recipient gets a non-blocking `try_send`
//! on its own bounded queue; a full or closed queue is logged and that
//! recipient is skipped. One slow friend never delays or fails the
//! others, and never fails the login that triggered the push.

use tokio::sync::{Mutex, mpsc};
use waypoint_protocol::{
    Codec, FriendRequest, FriendSummary, JsonCodec, LocationRequest, LocationView, LoginRequest,
    LoginResponse, LogoutRequest, LogoutResponse, Outbound, RefreshRequest, RefreshResponse,
    RegisterRequest, ServerEvent, UpdateUserRequest, UserId, UserListQuery, UserProfile,
    UserSummary,
};
use waypoint_session::{
    ConnectionHandle, ConnectionRegistry, Registration, SecretHasher, TokenIssuer,
};
use waypoint_store::{NewUser, TokenStore, UserDirectory, UserRecord, UserUpdate};
use waypoint_transport::{ConnectionId, Frame};

use crate::{PresenceConfig, PresenceError};

/// What a live connection gets back from [`PresenceEngine::attach`].
#[derive(Debug)]
pub struct Attachment {
    /// Hand this back to [`PresenceEngine::detach`] on disconnect.
    pub registration: Registration,
    /// Everything queued for this connection. The connection's writer
    /// task drains it. `None` from `recv` means the connection was
    /// superseded or logged out.
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Session and presence operations over a token store and a user
/// directory.
///
/// Generic over both so tests can swap in in-memory or failing backends.
pub struct PresenceEngine<S, D> {
    tokens: TokenIssuer,
    hasher: SecretHasher,
    store: S,
    directory: D,
    registry: Mutex<ConnectionRegistry>,
    codec: JsonCodec,
    config: PresenceConfig,
}

impl<S: TokenStore, D: UserDirectory> PresenceEngine<S, D> {
    pub fn new(
        tokens: TokenIssuer,
        hasher: SecretHasher,
        store: S,
        directory: D,
        config: PresenceConfig,
    ) -> Self {
        Self {
            tokens,
            hasher,
            store,
            directory,
            registry: Mutex::new(ConnectionRegistry::new()),
            codec: JsonCodec,
            config,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn hasher(&self) -> &SecretHasher {
        &self.hasher
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Authenticates a user, starts a session, and tells their live
    /// friends where they are.
    ///
    /// Success means both tokens were minted, the refresh record is
    /// stored, and the user is marked online. If marking online fails,
    /// the refresh record is removed again and the login fails.
    ///
    /// # Errors
    /// - [`PresenceError::MalformedInput`]: empty fields, coordinates out of range
    /// - [`PresenceError::AuthenticationFailed`]: unknown e-mail or wrong secret
    /// - [`PresenceError::DependencyUnavailable`]: store, directory or signing failure
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, PresenceError> {
        let email = req.email.trim();
        if email.is_empty() || req.password.is_empty() {
            return Err(PresenceError::MalformedInput(
                "email and password are required".into(),
            ));
        }
        validate_coordinates(req.lat, req.lng)?;

        let Some(user) = self.directory.find_by_email(email).await? else {
            self.hasher.spawn_verify_decoy(req.password).await;
            tracing::warn!("login for unknown e-mail");
            return Err(invalid_credentials());
        };
        if !self
            .hasher
            .spawn_verify(user.password_hash.clone(), req.password)
            .await
        {
            tracing::warn!(user_id = %user.id, "login with wrong secret");
            return Err(invalid_credentials());
        }

        let friends = self.directory.friends_of(user.id).await?;
        let friend_emails: Vec<String> = friends.iter().map(|f| f.email.clone()).collect();

        let access_token =
            self.tokens
                .issue_access_token(user.id, &user.email, &user.name, friend_emails.clone())?;
        let refresh_token = self.tokens.issue_refresh_token(user.id)?;

        self.store
            .store_refresh_token(user.id, &refresh_token, self.refresh_ttl())
            .await?;

        if let Err(e) = self
            .store
            .mark_online(user.id, self.config.presence_ttl())
            .await
        {
            tracing::error!(user_id = %user.id, error = %e, "marking online failed, rolling back login");
            if let Err(rollback) = self.store.delete_refresh_token(user.id, &refresh_token).await {
                tracing::error!(user_id = %user.id, error = %rollback, "refresh record rollback failed");
            }
            return Err(e.into());
        }

        let event = ServerEvent::Presence {
            user_id: user.id,
            name: user.name.clone(),
            lat: req.lat,
            lng: req.lng,
        };
        let friend_ids: Vec<UserId> = friends.iter().map(|f| f.id).collect();
        let notified = match self.encode_event(&event) {
            Some(frame) => self.dispatch(&friend_ids, &frame).await,
            None => 0,
        };

        tracing::info!(user_id = %user.id, friends = friend_ids.len(), notified, "user logged in");

        Ok(LoginResponse {
            access_token,
            refresh_token,
            user: profile(&user, friend_emails),
        })
    }

    /// Exchanges a stored refresh token for a new access token.
    ///
    /// The refresh token and its record are left as they are. If the
    /// record names a different owner than the caller (or the token
    /// itself does), the record is deleted on the spot: the token has
    /// leaked and must stop working for everyone.
    ///
    /// # Errors
    /// - [`PresenceError::AuthenticationFailed`]: invalid, expired, unknown or
    ///   mismatched refresh token
    /// - [`PresenceError::UserNotFound`]: the user no longer exists
    /// - [`PresenceError::DependencyUnavailable`]: store, directory or signing failure
    pub async fn refresh(&self, req: RefreshRequest) -> Result<RefreshResponse, PresenceError> {
        let claims = self.tokens.validate_refresh(&req.refresh_token)?;
        let owner = self
            .store
            .fetch_refresh_token(req.user_id, &req.refresh_token)
            .await?;

        if owner != req.user_id || claims.user_id != req.user_id {
            self.revoke(req.user_id, owner, &req.refresh_token).await;
            return Err(PresenceError::AuthenticationFailed(
                "refresh token does not belong to this user".into(),
            ));
        }

        let user = self
            .directory
            .find_by_id(req.user_id)
            .await?
            .ok_or(PresenceError::UserNotFound(req.user_id))?;
        let friend_emails = self
            .directory
            .friends_of(user.id)
            .await?
            .into_iter()
            .map(|f| f.email)
            .collect();

        let access_token =
            self.tokens
                .issue_access_token(user.id, &user.email, &user.name, friend_emails)?;

        tracing::info!(user_id = %user.id, "access token refreshed");
        Ok(RefreshResponse { access_token })
    }

    /// Ends a session: revokes the refresh token, drops the live
    /// connection, and marks the user offline.
    ///
    /// Once ownership is confirmed every step is attempted even if an
    /// earlier one fails. The first failure is returned, so the caller
    /// never hears "logged out" while the refresh record or the online
    /// marker might still be there.
    pub async fn logout(&self, req: LogoutRequest) -> Result<LogoutResponse, PresenceError> {
        let user_id = req.user_id;
        let owner = self
            .store
            .fetch_refresh_token(user_id, &req.refresh_token)
            .await?;
        if owner != user_id {
            self.revoke(user_id, owner, &req.refresh_token).await;
            return Err(PresenceError::AuthenticationFailed(
                "refresh token does not belong to this user".into(),
            ));
        }

        let mut first_error: Option<PresenceError> = None;

        if let Err(e) = self.store.delete_refresh_token(user_id, &req.refresh_token).await {
            tracing::error!(%user_id, error = %e, "logout: deleting refresh record failed");
            if first_error.is_none() {
                first_error = Some(e.into());
            }
        }

        let removed = self.registry.lock().await.deregister_by_identity(user_id);
        if let Some(handle) = removed {
            handle.close();
            tracing::info!(%user_id, conn_id = %handle.conn_id, "logout: connection closed");
        }

        if let Err(e) = self.store.mark_offline(user_id).await {
            tracing::error!(%user_id, error = %e, "logout: clearing online marker failed");
            if first_error.is_none() {
                first_error = Some(e.into());
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(%user_id, "user logged out");
                Ok(LogoutResponse {
                    message: "Successfully logged out".to_string(),
                })
            }
        }
    }

    /// Users with a live online marker, ascending.
    pub async fn online_users(&self) -> Result<Vec<UserId>, PresenceError> {
        Ok(self.store.list_online().await?)
    }

    async fn revoke(&self, claimed: UserId, owner: UserId, token: &str) {
        tracing::warn!(%claimed, %owner, "refresh token presented by non-owner, revoking");
        if let Err(e) = self.store.delete_refresh_token(owner, token).await {
            tracing::error!(%owner, error = %e, "revoking refresh token failed");
        }
    }

    fn refresh_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tokens.config().refresh_ttl_secs)
    }

    // -----------------------------------------------------------------------
    // Live connections
    // -----------------------------------------------------------------------

    /// Registers a live connection for `user_id`, closing any older one.
    ///
    /// A `connected` event is already queued on the returned receiver.
    pub async fn attach(&self, user_id: UserId, conn_id: ConnectionId) -> Attachment {
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));

        if let Some(frame) = self.encode_event(&ServerEvent::Connected { user_id }) {
            // Fresh channel with room for at least one item.
            if let Err(e) = tx.try_send(Outbound::Frame(frame)) {
                tracing::debug!(%user_id, %conn_id, error = %e, "could not queue connected event");
            }
        }

        let (registration, superseded) = self.registry.lock().await.register(user_id, conn_id, tx);
        if let Some(old) = superseded {
            old.close();
        }

        tracing::info!(%user_id, %conn_id, epoch = registration.epoch, "connection attached");
        Attachment {
            registration,
            outbound: rx,
        }
    }

    /// Removes the registration if it is still the current one.
    ///
    /// Returns `false` when a newer connection for the same user has
    /// taken over (or logout already removed it); that one is left alone.
    pub async fn detach(&self, registration: &Registration) -> bool {
        let removed = self.registry.lock().await.deregister_by_handle(registration);
        match removed {
            Some(handle) => {
                tracing::info!(user_id = %handle.user_id, conn_id = %handle.conn_id, "connection detached");
                true
            }
            None => false,
        }
    }

    /// Forwards a frame from `sender` to each of their live friends,
    /// byte-for-byte and with its frame kind preserved.
    ///
    /// Returns how many friends it was queued for.
    pub async fn relay(&self, sender: UserId, frame: Frame) -> Result<usize, PresenceError> {
        let friends: Vec<UserId> = self
            .directory
            .friends_of(sender)
            .await?
            .iter()
            .map(|f| f.id)
            .collect();

        let delivered = self.dispatch(&friends, &frame).await;
        tracing::debug!(%sender, bytes = frame.len(), delivered, "frame relayed");
        Ok(delivered)
    }

    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.registry.lock().await.lookup(user_id).is_some()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Queues `frame` for every recipient that is connected right now.
    async fn dispatch(&self, recipients: &[UserId], frame: &Frame) -> usize {
        // Snapshot the handles, then push without the lock held.
        let handles: Vec<ConnectionHandle> = {
            let registry = self.registry.lock().await;
            recipients
                .iter()
                .filter_map(|id| registry.lookup(*id).cloned())
                .collect()
        };

        let mut delivered = 0;
        for handle in handles {
            match handle.try_push(Outbound::Frame(frame.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(user_id = %handle.user_id, conn_id = %handle.conn_id, "outbound queue full, push dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!(user_id = %handle.user_id, conn_id = %handle.conn_id, "connection gone, push dropped");
                }
            }
        }
        delivered
    }

    fn encode_event(&self, event: &ServerEvent) -> Option<Frame> {
        let encoded = self
            .codec
            .encode(event)
            .map_err(|e| e.to_string())
            .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()));
        match encoded {
            Ok(text) => Some(Frame::Text(text)),
            Err(e) => {
                tracing::error!(error = %e, "encoding server event failed");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Directory operations
    // -----------------------------------------------------------------------

    /// Creates an account.
    ///
    /// # Errors
    /// - [`PresenceError::MalformedInput`]: missing name/password, implausible e-mail
    /// - [`PresenceError::Conflict`]: e-mail already registered
    pub async fn register(&self, req: RegisterRequest) -> Result<UserProfile, PresenceError> {
        let email = req.email.trim();
        if !email.contains('@') || req.name.trim().is_empty() || req.password.is_empty() {
            return Err(PresenceError::MalformedInput(
                "name, password and a valid email are required".into(),
            ));
        }

        let password_hash = self.hasher.spawn_hash(req.password).await?;
        let user = self
            .directory
            .create_user(NewUser {
                name: req.name.trim().to_string(),
                email: email.to_string(),
                password_hash,
                home_address: req.home_address,
                share_address: req.share_address,
            })
            .await?;

        Ok(profile(&user, Vec::new()))
    }

    /// Makes `caller` and `req.friend_id` friends of each other.
    pub async fn add_friend(&self, caller: UserId, req: FriendRequest) -> Result<(), PresenceError> {
        self.directory.add_friendship(caller, req.friend_id).await?;
        Ok(())
    }

    /// Saves a location for `caller`.
    pub async fn add_location(
        &self,
        caller: UserId,
        req: LocationRequest,
    ) -> Result<LocationView, PresenceError> {
        validate_coordinates(req.latitude, req.longitude)?;
        let location = self
            .directory
            .add_location(caller, req.latitude, req.longitude, req.kind)
            .await?;
        Ok(LocationView::from(&location))
    }

    /// One page of users, each with their friends.
    pub async fn list_users(&self, query: UserListQuery) -> Result<Vec<UserSummary>, PresenceError> {
        let (offset, limit) = query.window();
        let users = self.directory.list_users(offset, limit).await?;

        let mut summaries = Vec::with_capacity(users.len());
        for user in &users {
            summaries.push(self.summarize(user).await?);
        }
        Ok(summaries)
    }

    /// # Errors
    /// [`PresenceError::UserNotFound`] if there is no such user.
    pub async fn user(&self, user_id: UserId) -> Result<UserSummary, PresenceError> {
        let user = self
            .directory
            .find_by_id(user_id)
            .await?
            .ok_or(PresenceError::UserNotFound(user_id))?;
        self.summarize(&user).await
    }

    /// Changes name and address settings. Users may only edit themselves.
    ///
    /// # Errors
    /// - [`PresenceError::Forbidden`]: `target` is not `caller`
    /// - [`PresenceError::MalformedInput`]: empty name
    /// - [`PresenceError::UserNotFound`]: the account is gone
    pub async fn update_user(
        &self,
        caller: UserId,
        target: UserId,
        req: UpdateUserRequest,
    ) -> Result<UserSummary, PresenceError> {
        require_self(caller, target)?;
        let name = req.name.trim();
        if name.is_empty() {
            return Err(PresenceError::MalformedInput("name is required".into()));
        }

        let user = self
            .directory
            .update_user(
                target,
                UserUpdate {
                    name: name.to_string(),
                    home_address: req.home_address,
                    share_address: req.share_address,
                },
            )
            .await?;
        tracing::info!(user_id = %target, "user updated");
        self.summarize(&user).await
    }

    /// Deletes the caller's own account.
    ///
    /// The account and its friendships go first; after that the live
    /// connection is closed and the online marker cleared. A failure to
    /// clear the marker is logged only: the account is already gone and
    /// the marker lapses on its own TTL. Outstanding refresh tokens stop
    /// working because refresh reloads the user.
    ///
    /// # Errors
    /// - [`PresenceError::Forbidden`]: `target` is not `caller`
    /// - [`PresenceError::UserNotFound`]: the account is already gone
    pub async fn delete_user(&self, caller: UserId, target: UserId) -> Result<(), PresenceError> {
        require_self(caller, target)?;
        self.directory.delete_user(target).await?;

        let removed = self.registry.lock().await.deregister_by_identity(target);
        if let Some(handle) = removed {
            handle.close();
            tracing::info!(user_id = %target, conn_id = %handle.conn_id, "account deleted, connection closed");
        }
        if let Err(e) = self.store.mark_offline(target).await {
            tracing::warn!(user_id = %target, error = %e, "clearing online marker of deleted user failed");
        }

        tracing::info!(user_id = %target, "user deleted");
        Ok(())
    }

    async fn summarize(&self, user: &UserRecord) -> Result<UserSummary, PresenceError> {
        let friends = self
            .directory
            .friends_of(user.id)
            .await?
            .into_iter()
            .map(|f| FriendSummary {
                id: f.id,
                name: f.name,
                email: f.email,
            })
            .collect();
        Ok(UserSummary {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            friends,
        })
    }
}

fn require_self(caller: UserId, target: UserId) -> Result<(), PresenceError> {
    if caller == target {
        Ok(())
    } else {
        Err(PresenceError::Forbidden(format!(
            "{caller} may not modify {target}"
        )))
    }
}

fn invalid_credentials() -> PresenceError {
    PresenceError::AuthenticationFailed("invalid email or password".into())
}

fn validate_coordinates(lat: f64, lng: f64) -> Result<(), PresenceError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(PresenceError::MalformedInput(format!(
            "latitude {lat} is outside [-90, 90]"
        )));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(PresenceError::MalformedInput(format!(
            "longitude {lng} is outside [-180, 180]"
        )));
    }
    Ok(())
}

fn profile(user: &UserRecord, friends: Vec<String>) -> UserProfile {
    UserProfile {
        id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        home_address: user.home_address.clone(),
        friends,
        locations: user.locations.iter().map(LocationView::from).collect(),
    }
}
