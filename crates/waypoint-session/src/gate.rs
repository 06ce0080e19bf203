//! The authentication gate in front of every protected operation.
//!
//! The gate itself only knows the `Bearer <token>` convention. What a
//! token *means* is up to an [`Authenticator`]: in production that's the
//! [`TokenIssuer`], in tests it can be anything.
//!
//! # Why a trait?
//!
//! The HTTP extractor and the WebSocket handshake both go through
//! [`SessionGate`], and neither should care whether tokens are our own
//! JWTs or something a test made up. Swapping the authenticator is the
//! only change needed.

use waypoint_protocol::UserId;

use crate::{AuthError, Claims, TokenIssuer};

/// Turns a bearer token into verified claims.
///
/// `Send + Sync + 'static` because one authenticator is shared by every
/// request and connection task for the lifetime of the server.
///
/// # Example
///
/// ```rust
/// use waypoint_protocol::UserId;
/// use waypoint_session::{AuthError, Authenticator, Claims, TokenError, TokenKind};
///
/// /// Accepts tokens of the form `user-<n>`. Tests only.
/// struct NumberedUsers;
///
/// impl Authenticator for NumberedUsers {
///     async fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
///         let id = token
///             .strip_prefix("user-")
///             .and_then(|n| n.parse().ok())
///             .ok_or(AuthError::Token(TokenError::Malformed))?;
///         Ok(Claims {
///             user_id: UserId(id),
///             name: String::new(),
///             email: String::new(),
///             friends: Vec::new(),
///             iss: "test".into(),
///             iat: 0,
///             exp: u64::MAX,
///             jti: String::new(),
///             kind: TokenKind::Access,
///         })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` and returns what it proves.
    ///
    /// # Returns
    /// - `Ok(Claims)`: the token is good for a protected request
    /// - `Err(AuthError::Token(_))`: invalid, expired, or the wrong kind
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Claims, AuthError>> + Send;
}

/// Our own JWTs. Only access tokens get through; a refresh token
/// presented as a bearer credential is rejected.
impl Authenticator for TokenIssuer {
    async fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        Ok(self.validate_access(token)?)
    }
}

// ---------------------------------------------------------------------------
// SessionGate
// ---------------------------------------------------------------------------

/// Fails closed: anything other than a well-formed bearer header carrying
/// a token the authenticator accepts is an error.
#[derive(Debug, Clone)]
pub struct SessionGate<A> {
    authenticator: A,
}

impl<A: Authenticator> SessionGate<A> {
    pub fn new(authenticator: A) -> Self {
        Self { authenticator }
    }

    /// Checks the raw value of an `Authorization` header.
    ///
    /// # Errors
    /// - [`AuthError::MissingCredentials`] if `header` is `None`
    /// - [`AuthError::MalformedHeader`] if it isn't `Bearer <token>`
    /// - [`AuthError::Token`] if the authenticator refuses the token
    pub async fn authorize(&self, header: Option<&str>) -> Result<Claims, AuthError> {
        let header = header.ok_or(AuthError::MissingCredentials)?;
        let token = bearer_token(header)?;
        self.authorize_token(token).await
    }

    /// Checks a bare token, e.g. one passed as a query parameter where
    /// clients can't set headers.
    pub async fn authorize_token(&self, token: &str) -> Result<Claims, AuthError> {
        let result = self.authenticator.authenticate(token).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "bearer token rejected");
        }
        result
    }

    /// [`authorize`](Self::authorize), then requires the claims to name
    /// `user_id`. Used by the live-connection handshake, where the client
    /// states who it is separately from the token.
    pub async fn authorize_as(
        &self,
        header: Option<&str>,
        user_id: UserId,
    ) -> Result<Claims, AuthError> {
        let claims = self.authorize(header).await?;
        if claims.user_id != user_id {
            tracing::warn!(%user_id, token_user = %claims.user_id, "token names another user");
            return Err(AuthError::Token(crate::TokenError::Rejected(
                "token was issued to a different user".into(),
            )));
        }
        Ok(claims)
    }

    pub fn authenticator(&self) -> &A {
        &self.authenticator
    }
}

/// Extracts the token from `Bearer <token>`.
///
/// The scheme is matched case-insensitively. The token must be a single
/// non-empty word.
pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedHeader);
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}
