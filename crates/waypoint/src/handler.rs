//! Per-connection handler: handshake, auth, and frame relay.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Read `user_id` and the access token from the upgrade request
//!   2. Run the session gate; on failure send an `error` event and close
//!   3. Attach to the engine → a writer task drains the outbound queue
//!   4. Loop: receive frames → relay them to the user's live friends,
//!      pinging the client so a listen-only peer still counts as alive

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use waypoint_presence::Attachment;
use waypoint_protocol::{Outbound, ProtocolError, ServerEvent, UserId};
use waypoint_session::{Registration, SessionGate, TokenIssuer};
use waypoint_store::{TokenStore, UserDirectory};
use waypoint_transport::{Connection, Frame, Handshake, WebSocketConnection};

use crate::WaypointError;
use crate::server::ServerState;

/// Drop guard that detaches the connection when the handler exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async lock.
/// A stale guard (its connection already superseded) detaches nothing.
struct DetachGuard<S: TokenStore, D: UserDirectory> {
    registration: Registration,
    state: Arc<ServerState<S, D>>,
}

impl<S: TokenStore, D: UserDirectory> Drop for DetachGuard<S, D> {
    fn drop(&mut self) {
        let registration = self.registration;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.engine.detach(&registration).await;
        });
    }
}

/// Handles a single connection from upgrade to close.
pub(crate) async fn handle_connection<S, D>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S, D>>,
) -> Result<(), WaypointError>
where
    S: TokenStore,
    D: UserDirectory,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, path = %conn.handshake().path, "handling new connection");

    // --- Step 1: Handshake ---
    let user_id = match authenticate(conn.handshake(), &state.gate).await {
        Ok(user_id) => user_id,
        Err(e) => {
            if let Err(send_err) = reject(conn.as_ref(), rejection_code(&e), &e.to_string()).await {
                tracing::debug!(%conn_id, error = %send_err, "could not deliver rejection");
            }
            return Err(e);
        }
    };

    tracing::info!(%conn_id, %user_id, "live connection authenticated");

    let Attachment {
        registration,
        outbound,
    } = state.engine.attach(user_id, conn_id).await;
    let _guard = DetachGuard {
        registration,
        state: Arc::clone(&state),
    };

    // --- Step 2: Writer ---
    let mut writer = tokio::spawn(write_loop(Arc::clone(&conn), outbound));

    // --- Step 3: Read loop ---
    let idle = state.idle_timeout;
    let ping_every = (idle / 2).max(Duration::from_millis(100));
    let mut keepalive = tokio::time::interval_at(Instant::now() + ping_every, ping_every);

    loop {
        // Any inbound frame, pings and pongs included, pushes this back.
        let deadline = conn.last_seen() + idle;
        tokio::select! {
            _ = &mut writer => {
                // Superseded or logged out: the engine closed our queue.
                tracing::info!(%user_id, %conn_id, "connection closed by server");
                break;
            }
            read = conn.recv() => match read {
                Ok(Some(frame)) => {
                    if let Err(e) = state.engine.relay(user_id, frame).await {
                        tracing::warn!(%user_id, error = %e, "relay failed");
                    }
                }
                Ok(None) => {
                    tracing::info!(%user_id, %conn_id, "connection closed cleanly");
                    break;
                }
                Err(e) => {
                    tracing::debug!(%user_id, error = %e, "recv error");
                    break;
                }
            },
            _ = keepalive.tick() => {
                if let Err(e) = conn.ping().await {
                    tracing::debug!(%user_id, %conn_id, error = %e, "ping failed");
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if conn.last_seen().elapsed() >= idle {
                    tracing::info!(%user_id, %conn_id, "connection idle, dropping");
                    break;
                }
            }
        }
    }

    writer.abort();
    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }

    // _guard drops here → detach fires.
    Ok(())
}

/// Works out who the client is from the upgrade request.
///
/// The token may come as `Authorization: Bearer …` or, for clients that
/// can't set headers on a WebSocket upgrade, as `?token=…`. The header
/// wins when both are present.
async fn authenticate(
    handshake: &Handshake,
    gate: &SessionGate<TokenIssuer>,
) -> Result<UserId, WaypointError> {
    let user_id = handshake
        .param("user_id")
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(UserId)
        .ok_or_else(|| {
            ProtocolError::InvalidMessage("user_id query parameter is required".into())
        })?;

    let header = match (&handshake.authorization, handshake.param("token")) {
        (Some(header), _) => Some(header.clone()),
        (None, Some(token)) => Some(format!("Bearer {token}")),
        (None, None) => None,
    };

    gate.authorize_as(header.as_deref(), user_id).await?;
    Ok(user_id)
}

/// 400 for a malformed handshake, 401 for anything the gate refused.
fn rejection_code(error: &WaypointError) -> u16 {
    match error {
        WaypointError::Protocol(_) => 400,
        _ => 401,
    }
}

/// Sends an `error` event and closes the socket.
async fn reject(
    conn: &WebSocketConnection,
    code: u16,
    message: &str,
) -> Result<(), WaypointError> {
    let event = ServerEvent::Error {
        code,
        message: message.to_string(),
    };
    let text = serde_json::to_string(&event).map_err(ProtocolError::Encode)?;
    conn.send(Frame::Text(text)).await?;
    conn.close().await?;
    Ok(())
}

/// Drains the outbound queue onto the socket until the queue ends, a
/// `Close` arrives, or a send fails. Closes the socket on the way out.
async fn write_loop(conn: Arc<WebSocketConnection>, mut outbound: mpsc::Receiver<Outbound>) {
    let conn_id = conn.id();
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = conn.send(frame).await {
                    tracing::debug!(%conn_id, error = %e, "send failed, stopping writer");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_session::TokenConfig;

    fn gate() -> SessionGate<TokenIssuer> {
        SessionGate::new(
            TokenIssuer::new(TokenConfig {
                secret: "handler-test-secret-0123456789abcdef".into(),
                ..TokenConfig::default()
            })
            .unwrap(),
        )
    }

    fn access_token(gate: &SessionGate<TokenIssuer>, user_id: u64) -> String {
        gate.authenticator()
            .issue_access_token(UserId(user_id), "a@example.com", "a", Vec::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_missing_user_id_returns_protocol_error() {
        let gate = gate();
        let hs = Handshake::new("/ws", Some("token=abc"), None);

        let err = authenticate(&hs, &gate).await.unwrap_err();
        assert!(matches!(err, WaypointError::Protocol(_)));
        assert_eq!(rejection_code(&err), 400);
    }

    #[tokio::test]
    async fn test_authenticate_non_numeric_user_id_returns_protocol_error() {
        let gate = gate();
        let hs = Handshake::new("/ws", Some("user_id=alice"), None);
        assert!(matches!(
            authenticate(&hs, &gate).await,
            Err(WaypointError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_token_query_param_accepted() {
        let gate = gate();
        let token = access_token(&gate, 7);
        let query = format!("user_id=7&token={token}");
        let hs = Handshake::new("/ws", Some(query.as_str()), None);

        assert_eq!(authenticate(&hs, &gate).await.unwrap(), UserId(7));
    }

    #[tokio::test]
    async fn test_authenticate_bearer_header_accepted() {
        let gate = gate();
        let token = access_token(&gate, 7);
        let hs = Handshake::new("/ws", Some("user_id=7"), Some(format!("Bearer {token}")));

        assert_eq!(authenticate(&hs, &gate).await.unwrap(), UserId(7));
    }

    #[tokio::test]
    async fn test_authenticate_token_for_other_user_returns_auth_error() {
        let gate = gate();
        let token = access_token(&gate, 7);
        let query = format!("user_id=8&token={token}");
        let hs = Handshake::new("/ws", Some(query.as_str()), None);

        let err = authenticate(&hs, &gate).await.unwrap_err();
        assert!(matches!(err, WaypointError::Auth(_)));
        assert_eq!(rejection_code(&err), 401);
    }

    #[tokio::test]
    async fn test_authenticate_without_token_returns_auth_error() {
        let gate = gate();
        let hs = Handshake::new("/ws", Some("user_id=7"), None);
        assert!(matches!(
            authenticate(&hs, &gate).await,
            Err(WaypointError::Auth(_))
        ));
    }
}
