//! Access token verification.
//!
//! Tokens are HS256 JWTs issued by the external auth service. The realm only
//! verifies them: signature against the shared secret, `exp`, and `iss`
//! against the configured issuer. `sub` is the username.
//!
//! [`issue_token`] exists for the bot client and tests; production tokens come
//! from the auth service.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard claims carried by access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login session expired")]
    Expired,
    #[error("token was not issued by a trusted issuer")]
    UntrustedIssuer,
    #[error("token has an empty subject")]
    EmptySubject,
    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

impl AuthError {
    /// Reason shown to the player in `PlayerDisconnect`.
    pub fn player_message(&self) -> &'static str {
        match self {
            AuthError::Expired => "Login session expired",
            AuthError::UntrustedIssuer => "Login was not issued for this realm",
            AuthError::EmptySubject | AuthError::Invalid(_) => "Error parsing token",
        }
    }
}

/// Verifies access tokens with a process-wide secret and issuer.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, issuer: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_exp = true;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verifies `token` and returns its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidIssuer => AuthError::UntrustedIssuer,
                _ => AuthError::Invalid(e),
            }
        })?;
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::EmptySubject);
        }
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("issuer", &self.validation.iss)
            .finish_non_exhaustive()
    }
}

/// Mints a token valid for `ttl`. Negative `ttl` yields an expired token.
pub fn issue_token(
    secret: &str,
    issuer: &str,
    username: &str,
    ttl: Duration,
) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: username.to_string(),
        exp: (now + ttl).timestamp(),
        iss: issuer.to_string(),
        iat: Some(now.timestamp()),
    };
    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}
