//! Presence engine configuration.

use std::time::Duration;

use serde::Deserialize;

/// Tunables for [`PresenceEngine`](crate::PresenceEngine).
///
/// Token lifetimes are not here: they belong to
/// [`TokenConfig`](waypoint_session::TokenConfig), and the refresh record
/// TTL always matches the refresh token's own lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// How long a login keeps the user marked online.
    pub presence_ttl_secs: u64,

    /// Capacity of each connection's outbound queue. A friend whose queue
    /// is full when an event arrives misses that event.
    pub outbound_capacity: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            presence_ttl_secs: 15 * 60,
            outbound_capacity: 64,
        }
    }
}

impl PresenceConfig {
    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }
}
