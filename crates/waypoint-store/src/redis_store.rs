//! Redis-backed [`TokenStore`].
//!
//! Layout, with the default `waypoint` prefix:
//!
//! | key | type | contents |
//! |-----|------|----------|
//! | `waypoint:refresh_token:<sha256 hex>` | string, `EX` = refresh TTL | owner's numeric id |
//! | `waypoint:presence:online` | sorted set | member = user id, score = expiry (Unix ms) |
//!
//! Presence lives in one sorted set rather than a key per user, so
//! listing who is online is a range read over that set and never scans
//! the keyspace. Expired members are pruned in the same atomic pipeline
//! that reads the live ones.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::MultiplexedConnection;
use serde::Deserialize;
use waypoint_protocol::UserId;

use crate::{StoreError, TokenStore, refresh_token_digest};

/// Connection settings for [`RedisTokenStore`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// e.g. `redis://127.0.0.1:6379/0`
    pub url: String,
    /// Namespace for every key this store writes.
    pub key_prefix: String,
    /// Upper bound on any single command, connect included.
    pub op_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "waypoint".to_string(),
            op_timeout_ms: 2_000,
        }
    }
}

/// A [`TokenStore`] on a shared Redis instance.
///
/// `MultiplexedConnection` pipelines concurrent requests over one socket
/// and is cheap to clone, so each call clones it instead of locking.
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: MultiplexedConnection,
    prefix: String,
    op_timeout: Duration,
}

impl RedisTokenStore {
    /// Opens a multiplexed connection to `config.url`.
    ///
    /// # Errors
    /// [`StoreError::Unavailable`] if the URL is invalid or the server
    /// can't be reached within the operation timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let op_timeout = Duration::from_millis(config.op_timeout_ms);
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = bounded(
            op_timeout,
            "CONNECT",
            client.get_multiplexed_async_connection(),
        )
        .await?;

        tracing::info!(prefix = %config.key_prefix, "connected to redis");
        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            op_timeout,
        })
    }

    /// Round-trips a `PING`.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let reply: String = bounded(
            self.op_timeout,
            "PING",
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Corrupt(format!("unexpected PING reply {reply:?}")))
        }
    }

    fn refresh_key(&self, token: &str) -> String {
        format!("{}:refresh_token:{}", self.prefix, refresh_token_digest(token))
    }

    fn online_key(&self) -> String {
        format!("{}:presence:online", self.prefix)
    }
}

impl std::fmt::Debug for RedisTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTokenStore")
            .field("prefix", &self.prefix)
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl TokenStore for RedisTokenStore {
    async fn store_refresh_token(
        &self,
        user_id: UserId,
        token: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // EX 0 is rejected by Redis; anything shorter than a second rounds up.
        let ttl_secs = ttl.as_secs().max(1);
        bounded(
            self.op_timeout,
            "SET",
            redis::cmd("SET")
                .arg(self.refresh_key(token))
                .arg(user_id.0)
                .arg("EX")
                .arg(ttl_secs)
                .query_async::<()>(&mut conn),
        )
        .await?;
        tracing::debug!(%user_id, ttl_secs, "refresh token stored");
        Ok(())
    }

    async fn fetch_refresh_token(&self, user_id: UserId, token: &str) -> Result<UserId, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = bounded(
            self.op_timeout,
            "GET",
            redis::cmd("GET")
                .arg(self.refresh_key(token))
                .query_async::<Option<String>>(&mut conn),
        )
        .await?;

        let value = value.ok_or(StoreError::NotFound)?;
        let owner = parse_user_id(&value)?;
        if owner != user_id {
            tracing::debug!(claimed = %user_id, %owner, "refresh token owner differs");
        }
        Ok(owner)
    }

    async fn delete_refresh_token(&self, user_id: UserId, token: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = bounded(
            self.op_timeout,
            "DEL",
            redis::cmd("DEL")
                .arg(self.refresh_key(token))
                .query_async::<i64>(&mut conn),
        )
        .await?;
        if removed > 0 {
            tracing::debug!(%user_id, "refresh token deleted");
        }
        Ok(())
    }

    async fn mark_online(&self, user_id: UserId, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let expires_at = unix_millis().saturating_add(duration_millis(ttl));
        bounded(
            self.op_timeout,
            "ZADD",
            redis::cmd("ZADD")
                .arg(self.online_key())
                .arg(expires_at)
                .arg(user_id.0)
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn mark_offline(&self, user_id: UserId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        bounded(
            self.op_timeout,
            "ZREM",
            redis::cmd("ZREM")
                .arg(self.online_key())
                .arg(user_id.0)
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn list_online(&self) -> Result<Vec<UserId>, StoreError> {
        let mut conn = self.conn.clone();
        let key = self.online_key();
        let now = unix_millis();

        // Prune everything at or past its expiry, then read the rest.
        let (members,): (Vec<String>,) = bounded(
            self.op_timeout,
            "ZRANGEBYSCORE",
            redis::pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg("-inf")
                .arg(now)
                .ignore()
                .cmd("ZRANGEBYSCORE")
                .arg(&key)
                .arg(format!("({now}"))
                .arg("+inf")
                .query_async::<(Vec<String>,)>(&mut conn),
        )
        .await?;

        let mut online = members
            .iter()
            .map(|m| parse_user_id(m))
            .collect::<Result<Vec<_>, _>>()?;
        online.sort();
        Ok(online)
    }
}

/// Runs one Redis round-trip under `timeout`.
async fn bounded<T>(
    timeout: Duration,
    op: &'static str,
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!(op, error = %e, "redis command failed");
            Err(StoreError::Unavailable(format!("{op}: {e}")))
        }
        Err(_) => {
            tracing::warn!(op, ?timeout, "redis command timed out");
            Err(StoreError::Unavailable(format!("{op}: timed out after {timeout:?}")))
        }
    }
}

fn parse_user_id(raw: &str) -> Result<UserId, StoreError> {
    raw.parse::<u64>()
        .map(UserId)
        .map_err(|_| StoreError::Corrupt(format!("not a user id: {raw:?}")))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
