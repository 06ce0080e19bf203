//! # Waypoint
//!
//! Session and real-time presence service.
//!
//! Users log in over HTTP and get an access/refresh token pair. They then
//! open a WebSocket, and from that moment on every friend who logs in is
//! pushed to them live, and every frame they send is relayed to their
//! connected friends.
//!
//! Two listeners share one [`PresenceEngine`]:
//!
//! ```text
//! HTTP  /api/login, /api/refresh-token, /api/logout, ...  ──┐
//!                                                           ├──→ PresenceEngine ──→ TokenStore
//! WS    /?user_id=7&token=...  (push + relay)             ──┘          │
//!                                                                      └──→ UserDirectory
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use waypoint::prelude::*;
//!
//! # async fn run() -> Result<(), WaypointError> {
//! let config = ServerConfig::default().with_env();
//! let server = WaypointServerBuilder::new()
//!     .config(config)
//!     .build(MemoryTokenStore::new(), MemoryDirectory::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod gate;
mod handler;
mod http;
mod server;

pub use config::{SECRET_ENV, ServerConfig};
pub use error::WaypointError;
pub use gate::Authenticated;
pub use http::ApiError;
pub use server::{WaypointServer, WaypointServerBuilder};
pub use waypoint_presence::PresenceEngine;

pub mod prelude {
    pub use crate::{ServerConfig, WaypointError, WaypointServer, WaypointServerBuilder};

    pub use waypoint_presence::{PresenceConfig, PresenceEngine, PresenceError};
    pub use waypoint_protocol::{
        FriendRequest, LocationKind, LocationRequest, LoginRequest, LoginResponse, LogoutRequest,
        RefreshRequest, RegisterRequest, ServerEvent, UpdateUserRequest, UserId, UserListQuery,
        UserSummary,
    };
    pub use waypoint_session::{Claims, CredentialConfig, TokenConfig, TokenIssuer};
    pub use waypoint_store::{
        MemoryDirectory, MemoryTokenStore, RedisConfig, RedisTokenStore, TokenStore,
        UserDirectory,
    };
}
