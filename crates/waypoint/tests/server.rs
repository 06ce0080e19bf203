//! Integration tests for the Waypoint server: HTTP API, live connections,
//! and the full login → push → logout flow over real sockets.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use waypoint::prelude::*;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

const SECRET: &str = "integration-secret-0123456789abcdef";

struct TestServer {
    http: String,
    ws: String,
    client: reqwest::Client,
}

/// Starts a server on random ports with alice(1), bob(2) and carol(3).
/// alice is friends with bob and carol.
async fn start_server() -> TestServer {
    start_server_with_idle(Duration::from_secs(120)).await
}

async fn start_server_with_idle(idle_timeout: Duration) -> TestServer {
    let server = WaypointServerBuilder::new()
        .http_addr("127.0.0.1:0")
        .ws_addr("127.0.0.1:0")
        .idle_timeout(idle_timeout)
        .token_config(TokenConfig {
            secret: SECRET.into(),
            ..TokenConfig::default()
        })
        .credential_config(CredentialConfig::low_cost())
        .build(MemoryTokenStore::new(), MemoryDirectory::new())
        .await
        .expect("server should build");

    for name in ["alice", "bob", "carol"] {
        server
            .engine()
            .register(RegisterRequest {
                email: format!("{name}@example.com"),
                name: name.into(),
                password: format!("{name}-pw"),
                home_address: String::new(),
                share_address: false,
            })
            .await
            .expect("seed user");
    }
    for friend in [UserId(2), UserId(3)] {
        server
            .engine()
            .add_friend(UserId(1), FriendRequest { friend_id: friend })
            .await
            .expect("seed friendship");
    }

    let http = format!("http://{}", server.http_addr().expect("http addr"));
    let ws = format!("ws://{}", server.ws_addr().expect("ws addr"));

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loops a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;

    TestServer {
        http,
        ws,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{path}", self.http))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str, bearer: Option<&str>) -> (u16, Value) {
        let mut req = self.client.get(format!("{}{path}", self.http));
        if let Some(token) = bearer {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let resp = req.send().await.expect("request");
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn login(&self, name: &str, lat: f64, lng: f64) -> Value {
        let (status, body) = self
            .post(
                "/api/login",
                json!({
                    "email": format!("{name}@example.com"),
                    "password": format!("{name}-pw"),
                    "lat": lat,
                    "lng": lng,
                }),
            )
            .await;
        assert_eq!(status, 200, "login {name}: {body}");
        body
    }

    /// Opens a live connection with the token as a query parameter and
    /// consumes the `connected` event.
    async fn connect(&self, user_id: u64, access_token: &str) -> ClientWs {
        let url = format!("{}/?user_id={user_id}&token={access_token}", self.ws);
        let (mut ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("should connect");
        let connected = next_json(&mut ws).await;
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["user_id"], user_id);
        ws
    }

    async fn connect_raw(&self, query: &str) -> ClientWs {
        let (ws, _) = tokio_tungstenite::connect_async(format!("{}/?{query}", self.ws))
            .await
            .expect("should connect");
        ws
    }
}

/// Next data frame, skipping control frames.
async fn next_message(ws: &mut ClientWs) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_json(ws: &mut ClientWs) -> Value {
    match next_message(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("json event"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Waits until the server closes the socket.
async fn expect_closed(ws: &mut ClientWs) {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {other:?}"),
        }
    }
}

/// Asserts nothing arrives within a short window.
async fn expect_silence(ws: &mut ClientWs) {
    let result = tokio::time::timeout(Duration::from_millis(150), ws.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

fn token(body: &Value, field: &str) -> String {
    body[field].as_str().expect("token field").to_string()
}

// =========================================================================
// HTTP API
// =========================================================================

#[tokio::test]
async fn test_health_returns_ok() {
    let server = start_server().await;
    let (status, body) = server.get("/health", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_login_returns_tokens_and_profile() {
    let server = start_server().await;
    let body = server.login("alice", 41.0, 29.0).await;

    assert!(!token(&body, "access_token").is_empty());
    assert!(!token(&body, "refresh_token").is_empty());
    assert_eq!(body["user"]["id"], 1);
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(
        body["user"]["friends"],
        json!(["bob@example.com", "carol@example.com"])
    );
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_login_wrong_password_returns_401() {
    let server = start_server().await;
    let (status, body) = server
        .post(
            "/api/login",
            json!({"email": "alice@example.com", "password": "nope", "lat": 0.0, "lng": 0.0}),
        )
        .await;
    assert_eq!(status, 401);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_login_malformed_body_returns_400() {
    let server = start_server().await;

    let (status, body) = server
        .post("/api/login", json!({"email": "alice@example.com"}))
        .await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    let (status, _) = server
        .post(
            "/api/login",
            json!({"email": "alice@example.com", "password": "alice-pw", "lat": 91.0, "lng": 0.0}),
        )
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_refresh_owner_mismatch_returns_401() {
    let server = start_server().await;
    let login = server.login("alice", 0.0, 0.0).await;

    let (status, _) = server
        .post(
            "/api/refresh-token",
            json!({"user_id": 2, "refresh_token": token(&login, "refresh_token")}),
        )
        .await;
    assert_eq!(status, 401);

    // The token was revoked for its real owner too.
    let (status, _) = server
        .post(
            "/api/refresh-token",
            json!({"user_id": 1, "refresh_token": token(&login, "refresh_token")}),
        )
        .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_me_requires_access_token() {
    let server = start_server().await;
    let login = server.login("alice", 0.0, 0.0).await;

    let (status, claims) = server
        .get("/api/me", Some(&token(&login, "access_token")))
        .await;
    assert_eq!(status, 200);
    assert_eq!(claims["userId"], 1);
    assert_eq!(claims["kind"], "access");

    let (status, _) = server.get("/api/me", None).await;
    assert_eq!(status, 401);

    let (status, _) = server
        .get("/api/me", Some(&token(&login, "refresh_token")))
        .await;
    assert_eq!(status, 401, "refresh tokens are not bearer credentials");

    let (status, _) = server.get("/api/me", Some("garbage")).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_register_then_duplicate_returns_409() {
    let server = start_server().await;
    let body = json!({
        "email": "dave@example.com",
        "name": "dave",
        "password": "dave-pw",
    });

    let (status, user) = server.post("/api/register", body.clone()).await;
    assert_eq!(status, 201);
    assert_eq!(user["id"], 4);

    let (status, _) = server.post("/api/register", body).await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn test_friends_and_location_endpoints_use_caller_identity() {
    let server = start_server().await;
    let login = server.login("bob", 0.0, 0.0).await;
    let access = token(&login, "access_token");

    let resp = server
        .client
        .post(format!("{}/api/users/friends", server.http))
        .bearer_auth(&access)
        .json(&json!({"friend_id": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);

    let resp = server
        .client
        .post(format!("{}/api/users/friends", server.http))
        .bearer_auth(&access)
        .json(&json!({"friend_id": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 409, "already friends with alice");

    let resp = server
        .client
        .post(format!("{}/api/users/location", server.http))
        .bearer_auth(&access)
        .json(&json!({"latitude": 41.0, "longitude": 29.0, "type": "Good"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let location: Value = resp.json().await.unwrap();
    assert_eq!(location["type"], "Good");

    let resp = server
        .client
        .post(format!("{}/api/users/location", server.http))
        .json(&json!({"latitude": 41.0, "longitude": 29.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}

#[tokio::test]
async fn test_user_listing_and_lookup_require_bearer() {
    let server = start_server().await;
    let access = token(&server.login("bob", 0.0, 0.0).await, "access_token");

    let (status, users) = server.get("/api/users?page=1&pageSize=2", Some(&access)).await;
    assert_eq!(status, 200);
    assert_eq!(users.as_array().unwrap().len(), 2);
    assert_eq!(users[0]["name"], "alice");
    assert_eq!(users[0]["friends"][0]["id"], 2);

    let (status, carol) = server.get("/api/users/3", Some(&access)).await;
    assert_eq!(status, 200);
    assert_eq!(carol["email"], "carol@example.com");
    assert!(carol.get("home_address").is_none());

    let (status, _) = server.get("/api/users/99", Some(&access)).await;
    assert_eq!(status, 404);
    let (status, _) = server.get("/api/users/abc", Some(&access)).await;
    assert_eq!(status, 400);
    let (status, _) = server.get("/api/users", None).await;
    assert_eq!(status, 401);
    let (status, _) = server.get("/api/users/1", None).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_update_user_only_own_account() {
    let server = start_server().await;
    let access = token(&server.login("bob", 0.0, 0.0).await, "access_token");
    let body = json!({"name": "Robert", "home_address": "7 Side St", "share_address": true});

    let resp = server
        .client
        .put(format!("{}/api/users/2", server.http))
        .bearer_auth(&access)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["name"], "Robert");

    let resp = server
        .client
        .put(format!("{}/api/users/1", server.http))
        .bearer_auth(&access)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);
}

#[tokio::test]
async fn test_delete_user_then_lookup_returns_404() {
    let server = start_server().await;
    let bob = server.login("bob", 0.0, 0.0).await;
    let access = token(&bob, "access_token");
    let mut bob_ws = server.connect(2, &access).await;

    let resp = server
        .client
        .delete(format!("{}/api/users/1", server.http))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    let resp = server
        .client
        .delete(format!("{}/api/users/2", server.http))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);
    expect_closed(&mut bob_ws).await;

    let (status, _) = server.get("/api/users/2", Some(&access)).await;
    assert_eq!(status, 404);
    let (status, _) = server
        .post(
            "/api/refresh-token",
            json!({"user_id": 2, "refresh_token": token(&bob, "refresh_token")}),
        )
        .await;
    assert_eq!(status, 404);
}

// =========================================================================
// Live connections
// =========================================================================

#[tokio::test]
async fn test_connect_with_bearer_header_accepted() {
    let server = start_server().await;
    let login = server.login("bob", 0.0, 0.0).await;

    let mut request = format!("{}/?user_id=2", server.ws)
        .into_client_request()
        .unwrap();
    let header = format!("Bearer {}", token(&login, "access_token"));
    request
        .headers_mut()
        .insert("Authorization", HeaderValue::from_str(&header).unwrap());

    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let connected = next_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["user_id"], 2);
}

#[tokio::test]
async fn test_connect_without_user_id_returns_400_and_closes() {
    let server = start_server().await;
    let login = server.login("bob", 0.0, 0.0).await;

    let mut ws = server
        .connect_raw(&format!("token={}", token(&login, "access_token")))
        .await;
    let err = next_json(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], 400);
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_connect_bad_token_returns_401_and_closes() {
    let server = start_server().await;

    let mut ws = server.connect_raw("user_id=2&token=not.a.token").await;
    let err = next_json(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], 401);
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_connect_with_other_users_token_returns_401() {
    let server = start_server().await;
    let login = server.login("bob", 0.0, 0.0).await;

    let mut ws = server
        .connect_raw(&format!("user_id=1&token={}", token(&login, "access_token")))
        .await;
    assert_eq!(next_json(&mut ws).await["code"], 401);
}

#[tokio::test]
async fn test_relay_preserves_frame_kind() {
    let server = start_server().await;
    let alice_login = server.login("alice", 0.0, 0.0).await;
    let bob_login = server.login("bob", 0.0, 0.0).await;

    let mut alice = server
        .connect(1, &token(&alice_login, "access_token"))
        .await;
    let mut bob = server.connect(2, &token(&bob_login, "access_token")).await;

    alice
        .send(Message::Binary(vec![0u8, 159, 146, 150].into()))
        .await
        .unwrap();
    match next_message(&mut bob).await {
        Message::Binary(data) => assert_eq!(&data[..], &[0u8, 159, 146, 150]),
        other => panic!("expected binary, got {other:?}"),
    }

    alice
        .send(Message::Text(r#"{"lat":1.5}"#.into()))
        .await
        .unwrap();
    match next_message(&mut bob).await {
        Message::Text(text) => assert_eq!(text.as_str(), r#"{"lat":1.5}"#),
        other => panic!("expected text, got {other:?}"),
    }

    // bob → alice works the other way too; carol isn't connected.
    bob.send(Message::Text("hi".into())).await.unwrap();
    assert_eq!(
        next_message(&mut alice).await,
        Message::Text("hi".into())
    );
}

#[tokio::test]
async fn test_second_connection_supersedes_first() {
    let server = start_server().await;
    let bob_login = server.login("bob", 0.0, 0.0).await;
    let access = token(&bob_login, "access_token");

    let mut first = server.connect(2, &access).await;
    let mut second = server.connect(2, &access).await;
    expect_closed(&mut first).await;

    // Pushes go to the newest connection.
    server.login("alice", 10.0, 20.0).await;
    assert_eq!(next_json(&mut second).await["type"], "presence");
}

#[tokio::test]
async fn test_idle_timeout_client_pings_keep_connection_alive() {
    let server = start_server_with_idle(Duration::from_secs(1)).await;
    let bob = server.login("bob", 1.0, 1.0).await;
    let mut bob_ws = server.connect(2, &token(&bob, "access_token")).await;

    // Only control frames for well past the idle timeout.
    for _ in 0..8 {
        bob_ws.send(Message::Ping(b"keepalive".to_vec().into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    server.login("alice", 10.0, 20.0).await;
    let event = next_json(&mut bob_ws).await;
    assert_eq!(event["type"], "presence");
    assert_eq!(event["user_id"], 1);
}

#[tokio::test]
async fn test_idle_timeout_listening_client_answers_server_pings() {
    let server = start_server_with_idle(Duration::from_secs(1)).await;
    let bob = server.login("bob", 1.0, 1.0).await;
    let mut bob_ws = server.connect(2, &token(&bob, "access_token")).await;

    // bob sends nothing; reading is enough to answer the server's pings.
    let listener = tokio::spawn(async move { next_json(&mut bob_ws).await });
    tokio::time::sleep(Duration::from_millis(2400)).await;

    server.login("alice", 10.0, 20.0).await;
    let event = listener.await.unwrap();
    assert_eq!(event["type"], "presence");
    assert_eq!(event["name"], "alice");
}

#[tokio::test]
async fn test_idle_timeout_silent_client_is_dropped() {
    let server = start_server_with_idle(Duration::from_secs(1)).await;
    let bob = server.login("bob", 1.0, 1.0).await;
    let mut bob_ws = server.connect(2, &token(&bob, "access_token")).await;

    // Not reading means the server's pings go unanswered.
    tokio::time::sleep(Duration::from_millis(1600)).await;
    expect_closed(&mut bob_ws).await;

    let (_, online) = server.get("/api/online-users", None).await;
    assert_eq!(online, json!([2]));
}

#[tokio::test]
async fn test_alice_and_bob_full_session() {
    let server = start_server().await;

    let bob_login = server.login("bob", 0.0, 0.0).await;
    let mut bob = server.connect(2, &token(&bob_login, "access_token")).await;

    // alice logs in: bob hears about it.
    let alice_login = server.login("alice", 41.0082, 28.9784).await;
    let push = next_json(&mut bob).await;
    assert_eq!(
        push,
        json!({"type": "presence", "user_id": 1, "name": "alice", "lat": 41.0082, "lng": 28.9784})
    );
    expect_silence(&mut bob).await;

    let (status, online) = server.get("/api/online-users", None).await;
    assert_eq!(status, 200);
    assert_eq!(online, json!([1, 2]));

    // alice refreshes.
    let refresh = token(&alice_login, "refresh_token");
    let (status, body) = server
        .post(
            "/api/refresh-token",
            json!({"user_id": 1, "refresh_token": refresh}),
        )
        .await;
    assert_eq!(status, 200);
    let (status, _) = server
        .get("/api/me", Some(&token(&body, "access_token")))
        .await;
    assert_eq!(status, 200);

    // alice connects, then logs out: her socket is closed.
    let mut alice = server
        .connect(1, &token(&alice_login, "access_token"))
        .await;
    let (status, body) = server
        .post("/api/logout", json!({"user_id": 1, "refresh_token": refresh}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Successfully logged out");
    expect_closed(&mut alice).await;

    let (_, online) = server.get("/api/online-users", None).await;
    assert_eq!(online, json!([2]));

    // The refresh token is dead.
    let (status, _) = server
        .post(
            "/api/refresh-token",
            json!({"user_id": 1, "refresh_token": refresh}),
        )
        .await;
    assert_eq!(status, 401);
}
