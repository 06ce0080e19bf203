//! Storage for Waypoint sessions.
//!
//! Two contracts live here:
//!
//! - [`TokenStore`]: refresh-token records and presence markers, both
//!   with TTLs. Implemented by [`RedisTokenStore`] for real deployments
//!   and [`MemoryTokenStore`] for tests and single-process dev.
//! - [`UserDirectory`]: accounts, friendships and locations. The session
//!   core only reads from it; [`MemoryDirectory`] is the in-process
//!   implementation.
//!
//! Both are async traits with `Send` futures, so the presence engine can
//! be generic over them and still be driven from spawned tasks.

#![allow(async_fn_in_trait)]

mod directory;
mod error;
mod memory;
mod redis_store;
mod store;

pub use directory::{
    LocationRecord, MemoryDirectory, NewUser, UserDirectory, UserRecord, UserUpdate,
};
pub use error::{DirectoryError, StoreError};
pub use memory::MemoryTokenStore;
pub use redis_store::{RedisConfig, RedisTokenStore};
pub use store::{TokenStore, refresh_token_digest};
