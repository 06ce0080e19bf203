//! Server configuration.
//!
//! Every section has working defaults, so an empty TOML file (or none at
//! all) yields a runnable local server. The one thing that can't default
//! safely is the token signing secret: set it in `[token]` or through
//! `WAYPOINT_JWT_SECRET`.
//!
//! ```toml
//! http_addr = "0.0.0.0:8080"
//! ws_addr = "0.0.0.0:8081"
//!
//! [token]
//! issuer = "waypoint"
//! access_ttl_secs = 900
//!
//! [redis]
//! url = "redis://127.0.0.1:6379/0"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use waypoint_presence::PresenceConfig;
use waypoint_session::{CredentialConfig, TokenConfig};
use waypoint_store::RedisConfig;

use crate::WaypointError;

/// Environment variable that replaces `token.secret` when set.
pub const SECRET_ENV: &str = "WAYPOINT_JWT_SECRET";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the HTTP API.
    pub http_addr: String,
    /// Address of the live-connection (WebSocket) listener.
    pub ws_addr: String,
    /// A live connection that sends nothing for this long is dropped.
    pub idle_timeout_secs: u64,
    /// How long a client gets to complete the WebSocket upgrade.
    pub handshake_timeout_secs: u64,
    pub token: TokenConfig,
    pub presence: PresenceConfig,
    pub credentials: CredentialConfig,
    /// Without this section the server keeps tokens and presence in
    /// process memory.
    pub redis: Option<RedisConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".to_string(),
            ws_addr: "127.0.0.1:8081".to_string(),
            idle_timeout_secs: 120,
            handshake_timeout_secs: 5,
            token: TokenConfig::default(),
            presence: PresenceConfig::default(),
            credentials: CredentialConfig::default(),
            redis: None,
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, WaypointError> {
        Ok(toml::from_str(raw)?)
    }

    /// Reads and parses a TOML file, then applies [`SECRET_ENV`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WaypointError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WaypointError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(Self::from_toml_str(&raw)?.with_env())
    }

    /// Applies environment overrides.
    pub fn with_env(self) -> Self {
        self.with_secret_override(std::env::var(SECRET_ENV).ok())
    }

    fn with_secret_override(mut self, secret: Option<String>) -> Self {
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.token.secret = secret;
        }
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, "127.0.0.1:8080");
        assert_eq!(config.ws_addr, "127.0.0.1:8081");
        assert_eq!(config.idle_timeout(), Duration::from_secs(120));
        assert_eq!(config.token.issuer, "waypoint");
        assert_eq!(config.token.access_ttl_secs, 900);
        assert_eq!(config.token.refresh_ttl_secs, 604_800);
        assert_eq!(config.presence.presence_ttl_secs, 900);
        assert!(config.redis.is_none());
    }

    #[test]
    fn test_from_toml_str_empty_is_default() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
    }

    #[test]
    fn test_from_toml_str_nested_sections() {
        let raw = r#"
            ws_addr = "0.0.0.0:9000"

            [token]
            secret = "0123456789abcdef0123456789abcdef"
            access_ttl_secs = 60

            [presence]
            outbound_capacity = 8

            [redis]
            url = "redis://cache:6379/2"
        "#;
        let config = ServerConfig::from_toml_str(raw).unwrap();

        assert_eq!(config.ws_addr, "0.0.0.0:9000");
        assert_eq!(config.http_addr, "127.0.0.1:8080");
        assert_eq!(config.token.access_ttl_secs, 60);
        assert_eq!(config.token.refresh_ttl_secs, 604_800);
        assert_eq!(config.presence.outbound_capacity, 8);

        let redis = config.redis.unwrap();
        assert_eq!(redis.url, "redis://cache:6379/2");
        assert_eq!(redis.op_timeout_ms, 2_000);
    }

    #[test]
    fn test_from_toml_str_wrong_type_returns_config_error() {
        let result = ServerConfig::from_toml_str("idle_timeout_secs = \"soon\"");
        assert!(matches!(result, Err(WaypointError::Config(_))));
    }

    #[test]
    fn test_secret_override_replaces_file_value() {
        let mut config = ServerConfig::default();
        config.token.secret = "from-file".into();

        let config = config.with_secret_override(Some("from-env".into()));
        assert_eq!(config.token.secret, "from-env");

        let config = config.with_secret_override(Some(String::new()));
        assert_eq!(config.token.secret, "from-env");
    }

    #[test]
    fn test_debug_does_not_print_secret() {
        let mut config = ServerConfig::default();
        config.token.secret = "super-secret-value-0123456789abcd".into();
        assert!(!format!("{config:?}").contains("super-secret"));
    }

    #[test]
    fn test_load_missing_file_returns_config_error() {
        let result = ServerConfig::load("/definitely/not/here/waypoint.toml");
        assert!(matches!(result, Err(WaypointError::Config(_))));
    }
}
