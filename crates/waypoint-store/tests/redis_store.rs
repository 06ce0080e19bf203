//! Integration tests against a live Redis.
//!
//! Skipped unless `WAYPOINT_TEST_REDIS_URL` is set, e.g.
//! `WAYPOINT_TEST_REDIS_URL=redis://127.0.0.1:6379/15 cargo test -p waypoint-store`.
//! Each test writes under its own random key prefix.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use waypoint_protocol::UserId;
use waypoint_store::{RedisConfig, RedisTokenStore, StoreError, TokenStore};

async fn store(test: &str) -> Option<RedisTokenStore> {
    let Ok(url) = std::env::var("WAYPOINT_TEST_REDIS_URL") else {
        eprintln!("skipping {test}: WAYPOINT_TEST_REDIS_URL not set");
        return None;
    };
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let config = RedisConfig {
        url,
        key_prefix: format!("waypoint-test-{test}-{nanos}"),
        ..RedisConfig::default()
    };
    Some(RedisTokenStore::connect(&config).await.expect("redis reachable"))
}

#[tokio::test]
async fn test_redis_ping_returns_ok() {
    let Some(store) = store("ping").await else { return };
    store.ping().await.unwrap();
}

#[tokio::test]
async fn test_redis_refresh_record_lifecycle() {
    let Some(store) = store("refresh").await else { return };
    let hour = Duration::from_secs(3600);

    store.store_refresh_token(UserId(1), "tok-a", hour).await.unwrap();
    assert_eq!(store.fetch_refresh_token(UserId(1), "tok-a").await, Ok(UserId(1)));
    // Claimed by someone else: the real owner comes back.
    assert_eq!(store.fetch_refresh_token(UserId(2), "tok-a").await, Ok(UserId(1)));

    store.delete_refresh_token(UserId(1), "tok-a").await.unwrap();
    assert_eq!(
        store.fetch_refresh_token(UserId(1), "tok-a").await,
        Err(StoreError::NotFound)
    );
}

#[tokio::test]
async fn test_redis_refresh_record_expires() {
    let Some(store) = store("refresh-ttl").await else { return };

    store
        .store_refresh_token(UserId(1), "tok-b", Duration::from_secs(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert_eq!(
        store.fetch_refresh_token(UserId(1), "tok-b").await,
        Err(StoreError::NotFound)
    );
}

#[tokio::test]
async fn test_redis_presence_listing() {
    let Some(store) = store("presence").await else { return };
    let hour = Duration::from_secs(3600);

    for id in [7, 3, 5] {
        store.mark_online(UserId(id), hour).await.unwrap();
    }
    store
        .mark_online(UserId(9), Duration::from_millis(200))
        .await
        .unwrap();
    store.mark_offline(UserId(5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(store.list_online().await.unwrap(), vec![UserId(3), UserId(7)]);
}
