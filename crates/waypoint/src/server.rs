//! `WaypointServer` builder and server loop.
//!
//! This is the entry point for running a Waypoint service. It ties
//! together all the layers: the HTTP API and the live-connection
//! listener both sit on one [`PresenceEngine`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use waypoint_presence::{PresenceConfig, PresenceEngine};
use waypoint_session::{CredentialConfig, SecretHasher, SessionGate, TokenConfig, TokenIssuer};
use waypoint_store::{TokenStore, UserDirectory};
use waypoint_transport::{Transport, Upgrade, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{ServerConfig, WaypointError};

/// Shared server state passed to each HTTP request and connection task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
pub(crate) struct ServerState<S, D> {
    pub(crate) engine: PresenceEngine<S, D>,
    pub(crate) gate: SessionGate<TokenIssuer>,
    pub(crate) idle_timeout: Duration,
}

/// Builder for configuring and starting a Waypoint server.
///
/// # Example
///
/// ```rust,no_run
/// use waypoint::prelude::*;
///
/// # async fn run() -> Result<(), WaypointError> {
/// let server = WaypointServerBuilder::new()
///     .http_addr("0.0.0.0:8080")
///     .ws_addr("0.0.0.0:8081")
///     .token_config(TokenConfig {
///         secret: std::env::var("WAYPOINT_JWT_SECRET").unwrap_or_default(),
///         ..TokenConfig::default()
///     })
///     .build(MemoryTokenStore::new(), MemoryDirectory::new())
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct WaypointServerBuilder {
    config: ServerConfig,
}

impl WaypointServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration, e.g. one loaded from TOML.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address of the HTTP API. Port 0 picks a free port.
    pub fn http_addr(mut self, addr: &str) -> Self {
        self.config.http_addr = addr.to_string();
        self
    }

    /// Sets the address of the live-connection listener.
    pub fn ws_addr(mut self, addr: &str) -> Self {
        self.config.ws_addr = addr.to_string();
        self
    }

    pub fn token_config(mut self, config: TokenConfig) -> Self {
        self.config.token = config;
        self
    }

    pub fn presence_config(mut self, config: PresenceConfig) -> Self {
        self.config.presence = config;
        self
    }

    pub fn credential_config(mut self, config: CredentialConfig) -> Self {
        self.config.credentials = config;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout_secs = timeout.as_secs();
        self
    }

    /// Validates the configuration and binds both listeners.
    ///
    /// # Errors
    /// - [`WaypointError::Token`] if the signing secret is too short
    /// - [`WaypointError::Credential`] if the hashing parameters are invalid
    /// - [`WaypointError::Io`] / [`WaypointError::Transport`] if binding fails
    pub async fn build<S, D>(
        self,
        store: S,
        directory: D,
    ) -> Result<WaypointServer<S, D>, WaypointError>
    where
        S: TokenStore,
        D: UserDirectory,
    {
        let config = self.config;
        let tokens = TokenIssuer::new(config.token.clone())?;
        let hasher = SecretHasher::new(config.credentials)?;

        let http = TcpListener::bind(&config.http_addr).await?;
        tracing::info!(addr = %config.http_addr, "HTTP API listening");
        let ws = WebSocketTransport::bind(&config.ws_addr)
            .await?
            .with_handshake_timeout(config.handshake_timeout());

        let state = Arc::new(ServerState {
            gate: SessionGate::new(tokens.clone()),
            engine: PresenceEngine::new(tokens, hasher, store, directory, config.presence.clone()),
            idle_timeout: config.idle_timeout(),
        });

        Ok(WaypointServer { http, ws, state })
    }
}

/// A bound Waypoint server.
///
/// Created by [`WaypointServerBuilder::build`]. Call [`run()`](Self::run)
/// to start serving.
pub struct WaypointServer<S, D> {
    http: TcpListener,
    ws: WebSocketTransport,
    state: Arc<ServerState<S, D>>,
}

impl<S: TokenStore, D: UserDirectory> WaypointServer<S, D> {
    /// Returns the address the HTTP API is bound to.
    pub fn http_addr(&self) -> std::io::Result<SocketAddr> {
        self.http.local_addr()
    }

    /// Returns the address the live-connection listener is bound to.
    pub fn ws_addr(&self) -> std::io::Result<SocketAddr> {
        self.ws.local_addr()
    }

    /// The engine behind both listeners. Useful for seeding users before
    /// [`run`](Self::run).
    pub fn engine(&self) -> &PresenceEngine<S, D> {
        &self.state.engine
    }

    /// Serves the HTTP API and accepts live connections until either
    /// listener fails. Runs until the process is terminated.
    pub async fn run(self) -> Result<(), WaypointError> {
        tracing::info!("Waypoint server running");

        let Self { http, ws, state } = self;
        let app = crate::http::router(Arc::clone(&state));
        let http = async move { axum::serve(http, app).await };
        let ws = accept_loop(ws, state);

        tokio::select! {
            result = http => {
                result?;
                Ok(())
            }
            result = ws => result,
        }
    }
}

/// Accepts sockets and spawns one task per connection. The WebSocket
/// upgrade runs inside that task, so a client that stalls mid-handshake
/// only holds up itself.
async fn accept_loop<S, D>(
    mut transport: WebSocketTransport,
    state: Arc<ServerState<S, D>>,
) -> Result<(), WaypointError>
where
    S: TokenStore,
    D: UserDirectory,
{
    loop {
        match transport.accept().await {
            Ok(pending) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let peer = pending.peer_addr();
                    let conn = match pending.upgrade().await {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::debug!(%peer, error = %e, "upgrade failed");
                            return;
                        }
                    };
                    if let Err(e) = handle_connection(conn, state).await {
                        tracing::debug!(error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}
