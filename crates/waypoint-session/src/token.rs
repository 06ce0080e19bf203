//! Signed session tokens (HS256 JWTs).
//!
//! A token is three base64url segments, `header.payload.signature`, where
//! the signature is HMAC-SHA-256 over `header.payload` with the server's
//! secret. We mint and check them directly with `hmac` + `sha2` rather
//! than pulling in a JWT framework: there is exactly one algorithm and one
//! claims shape.
//!
//! Two kinds exist:
//!
//! | kind | lifetime | carries |
//! |------|----------|---------|
//! | access | 15 min | id, name, e-mail, friend e-mails |
//! | refresh | 7 days | id only |
//!
//! Validation is pure. Every operation that reads the clock has an `_at`
//! twin that takes the current Unix time explicitly, which is what the
//! tests use.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use waypoint_protocol::UserId;

use crate::TokenError;

type HmacSha256 = Hmac<Sha256>;

const MIN_SECRET_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Which purpose a token was minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// The verified payload of a token.
///
/// Field names on the wire follow the JWT payload other clients of this
/// service already read (`userId`, not `user_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    /// Friend e-mails at the time the token was minted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub friends: Vec<String>,
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
    /// 128 random bits, hex. Two tokens minted in the same second for
    /// the same user still differ.
    pub jti: String,
    pub kind: TokenKind,
}

impl Claims {
    /// Passes the claims through if they are of `kind`.
    ///
    /// # Errors
    /// [`TokenError::Rejected`] otherwise.
    pub fn expect_kind(self, kind: TokenKind) -> Result<Self, TokenError> {
        if self.kind == kind {
            Ok(self)
        } else {
            Err(TokenError::Rejected(format!(
                "expected {kind:?} token, got {:?}",
                self.kind
            )))
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Token signing configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HS256 key. At least 32 bytes.
    pub secret: String,
    /// `iss` claim written into and required on every token.
    pub issuer: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "waypoint".to_string(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

// Keep the secret out of logs.
impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TokenIssuer
// ---------------------------------------------------------------------------

/// Mints and validates tokens under one secret and issuer.
#[derive(Clone, Debug)]
pub struct TokenIssuer {
    config: TokenConfig,
}

impl TokenIssuer {
    /// # Errors
    /// [`TokenError::SecretTooShort`] if the secret is under 32 bytes.
    pub fn new(config: TokenConfig) -> Result<Self, TokenError> {
        let len = config.secret.len();
        if len < MIN_SECRET_LEN {
            return Err(TokenError::SecretTooShort(len));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Mints an access token carrying the user's profile snapshot.
    ///
    /// # Errors
    /// [`TokenError::Signing`] if the claims can't be encoded.
    pub fn issue_access_token(
        &self,
        user_id: UserId,
        email: &str,
        name: &str,
        friends: Vec<String>,
    ) -> Result<String, TokenError> {
        self.issue_access_token_at(user_id, email, name, friends, unix_now())
    }

    pub fn issue_access_token_at(
        &self,
        user_id: UserId,
        email: &str,
        name: &str,
        friends: Vec<String>,
        now: u64,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            user_id,
            name: name.to_string(),
            email: email.to_string(),
            friends,
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now.saturating_add(self.config.access_ttl_secs),
            jti: generate_jti(),
            kind: TokenKind::Access,
        };
        self.sign(&claims)
    }

    /// Mints a refresh token. It carries the identity only.
    ///
    /// # Errors
    /// [`TokenError::Signing`] if the claims can't be encoded.
    pub fn issue_refresh_token(&self, user_id: UserId) -> Result<String, TokenError> {
        self.issue_refresh_token_at(user_id, unix_now())
    }

    pub fn issue_refresh_token_at(&self, user_id: UserId, now: u64) -> Result<String, TokenError> {
        let claims = Claims {
            user_id,
            name: String::new(),
            email: String::new(),
            friends: Vec::new(),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now.saturating_add(self.config.refresh_ttl_secs),
            jti: generate_jti(),
            kind: TokenKind::Refresh,
        };
        self.sign(&claims)
    }

    /// Checks structure, signature, expiry and issuer, in that order.
    ///
    /// Does not look at `kind`; see [`validate_access`](Self::validate_access)
    /// and [`validate_refresh`](Self::validate_refresh).
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, unix_now())
    }

    pub fn validate_at(&self, token: &str, now: u64) -> Result<Claims, TokenError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed);
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(TokenError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = decode_segment(payload_b64)?;
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if claims.iss != self.config.issuer {
            return Err(TokenError::Rejected(format!(
                "unexpected issuer {:?}",
                claims.iss
            )));
        }

        Ok(claims)
    }

    /// [`validate`](Self::validate) plus a check that this is an access token.
    pub fn validate_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate(token)?.expect_kind(TokenKind::Access)
    }

    /// [`validate`](Self::validate) plus a check that this is a refresh token.
    pub fn validate_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate(token)?.expect_kind(TokenKind::Refresh)
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let header = serde_json::to_vec(&header).map_err(|e| TokenError::Signing(e.to_string()))?;
        let payload = serde_json::to_vec(claims).map_err(|e| TokenError::Signing(e.to_string()))?;

        let mut token = URL_SAFE_NO_PAD.encode(header);
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(payload));

        let mut mac = self.mac()?;
        mac.update(token.as_bytes());
        let signature = mac.finalize().into_bytes();

        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(signature));
        Ok(token)
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

/// Seconds since the Unix epoch. A clock set before 1970 reads as 0.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_jti() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
