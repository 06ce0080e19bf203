//! A local Waypoint server with two seeded users.
//!
//! ```text
//! cargo run -p waypoint-dev-server               # defaults, in-memory store
//! cargo run -p waypoint-dev-server -- dev.toml   # with a config file
//! ```
//!
//! Log in as `john@mail.com` / `12` or `jane@mail.com` / `21`. They are
//! friends, so whoever connects first sees the other one log in.

use rand::Rng;
use tracing_subscriber::EnvFilter;
use waypoint::prelude::*;

#[tokio::main]
async fn main() -> Result<(), WaypointError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default().with_env(),
    };

    if config.token.secret.is_empty() {
        tracing::warn!(
            "no signing secret configured, using a random one; tokens won't survive a restart"
        );
        config.token.secret = random_secret();
    }

    match config.redis.clone() {
        Some(redis) => {
            let store = RedisTokenStore::connect(&redis).await?;
            tracing::info!(url = %redis.url, "using Redis token store");
            serve(config, store).await
        }
        None => {
            tracing::info!("using in-memory token store");
            serve(config, MemoryTokenStore::new()).await
        }
    }
}

async fn serve<S: TokenStore>(config: ServerConfig, store: S) -> Result<(), WaypointError> {
    let server = WaypointServerBuilder::new()
        .config(config)
        .build(store, MemoryDirectory::new())
        .await?;

    seed(server.engine()).await?;

    tracing::info!(
        http = %server.http_addr()?,
        ws = %server.ws_addr()?,
        "dev server ready"
    );
    server.run().await
}

async fn seed<S: TokenStore, D: UserDirectory>(
    engine: &PresenceEngine<S, D>,
) -> Result<(), WaypointError> {
    let john = engine
        .register(RegisterRequest {
            email: "john@mail.com".into(),
            name: "John".into(),
            password: "12".into(),
            home_address: "123 Main St".into(),
            share_address: true,
        })
        .await?;
    let jane = engine
        .register(RegisterRequest {
            email: "jane@mail.com".into(),
            name: "Jane".into(),
            password: "21".into(),
            home_address: "456 Elm St".into(),
            share_address: true,
        })
        .await?;
    engine
        .add_friend(john.id, FriendRequest { friend_id: jane.id })
        .await?;

    tracing::info!(john = %john.id, jane = %jane.id, "seeded users");
    Ok(())
}

/// 32 random bytes, hex-encoded.
fn random_secret() -> String {
    rand::rng()
        .random::<[u8; 32]>()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
