//! In-process [`TokenStore`].
//!
//! Used by the test suites and by the dev server when no Redis URL is
//! configured. Deadlines are `tokio::time::Instant`, so tests can drive
//! expiry with `tokio::time::pause()` / `advance()` instead of sleeping.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use waypoint_protocol::UserId;

use crate::{StoreError, TokenStore, refresh_token_digest};

#[derive(Debug, Default)]
struct MemoryState {
    /// digest → (owner, deadline)
    refresh: HashMap<String, (UserId, Instant)>,
    /// user → deadline
    online: HashMap<UserId, Instant>,
}

/// A [`TokenStore`] held entirely in memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    state: Mutex<MemoryState>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refresh records that haven't expired yet.
    pub async fn live_refresh_records(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .refresh
            .values()
            .filter(|(_, deadline)| *deadline > now)
            .count()
    }
}

impl TokenStore for MemoryTokenStore {
    async fn store_refresh_token(
        &self,
        user_id: UserId,
        token: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let deadline = now + ttl;
        let mut state = self.state.lock().await;
        // Records nobody refreshes or logs out of would otherwise stay forever.
        state.refresh.retain(|_, (_, expires)| *expires > now);
        state
            .refresh
            .insert(refresh_token_digest(token), (user_id, deadline));
        tracing::debug!(%user_id, ttl_secs = ttl.as_secs(), "refresh token stored");
        Ok(())
    }

    async fn fetch_refresh_token(&self, _user_id: UserId, token: &str) -> Result<UserId, StoreError> {
        let key = refresh_token_digest(token);
        let mut state = self.state.lock().await;

        let Some(&(owner, deadline)) = state.refresh.get(&key) else {
            return Err(StoreError::NotFound);
        };
        if deadline > Instant::now() {
            return Ok(owner);
        }
        state.refresh.remove(&key);
        Err(StoreError::NotFound)
    }

    async fn delete_refresh_token(&self, user_id: UserId, token: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.refresh.remove(&refresh_token_digest(token)).is_some() {
            tracing::debug!(%user_id, "refresh token deleted");
        }
        Ok(())
    }

    async fn mark_online(&self, user_id: UserId, ttl: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + ttl;
        self.state.lock().await.online.insert(user_id, deadline);
        Ok(())
    }

    async fn mark_offline(&self, user_id: UserId) -> Result<(), StoreError> {
        self.state.lock().await.online.remove(&user_id);
        Ok(())
    }

    async fn list_online(&self) -> Result<Vec<UserId>, StoreError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.online.retain(|_, deadline| *deadline > now);

        let mut online: Vec<UserId> = state.online.keys().copied().collect();
        online.sort();
        Ok(online)
    }
}
