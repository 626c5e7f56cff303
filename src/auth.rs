//! Password hashing, bearer tokens, and the request authentication extractor.
//!
//! Passwords are stored as PBKDF2-HMAC-SHA256 hashes with a per-user random
//! salt, encoded as `pbkdf2_sha256$<iterations>$<salt b64>$<hash b64>`.
//! Tokens are HS256 JWTs carrying the user's email as `sub` plus an `exp`.
//!
//! Every way a request can fail authentication (no header, malformed token,
//! bad signature, expired, unknown user) produces the same 401 response.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, error};

use crate::models::User;
use crate::server::AppError;
use crate::users;

const HASH_SCHEME: &str = "pbkdf2_sha256";
const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => panic!("iterations must be non-zero"),
};
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Message returned for every rejected bearer token.
pub const CREDENTIALS_ERROR: &str = "Could not validate credentials";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token subject is not a registered user")]
    UnknownSubject,
    #[error("token could not be issued: {0}")]
    Issue(String),
    #[error("password hashing failed")]
    Crypto,
}

// ============ Passwords ============

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| AuthError::Crypto)?;

    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        PBKDF2_ITERATIONS,
        &salt,
        password.as_bytes(),
        &mut hash,
    );

    Ok(format!(
        "{}${}${}${}",
        HASH_SCHEME,
        PBKDF2_ITERATIONS,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(hash)
    ))
}

/// Check a password against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let Some(iterations) = iterations.parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(hash))
    else {
        return false;
    };

    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok()
}

// ============ Tokens ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the user's email.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// Issues and validates HS256 bearer tokens with a fixed lifetime.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: chrono::Duration::try_minutes(ttl_minutes)
                .unwrap_or_else(chrono::Duration::max_value),
        }
    }

    pub fn issue(&self, email: &str) -> Result<String, AuthError> {
        self.issue_with_ttl(email, self.ttl)
    }

    pub fn issue_with_ttl(&self, email: &str, ttl: chrono::Duration) -> Result<String, AuthError> {
        let exp = chrono::Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::Issue("token lifetime out of range".to_string()))?;
        let claims = Claims {
            sub: email.to_string(),
            exp: exp.timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

// ============ Extractor ============

/// The pieces of application state authentication needs.
#[derive(Clone)]
pub struct AuthState {
    pub pool: SqlitePool,
    pub tokens: Arc<TokenIssuer>,
}

/// A request whose bearer token resolved to a registered user.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    let (scheme, token) = header.split_once(' ').ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token.trim())
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthState::from_ref(state);

        let claims = bearer_token(parts)
            .and_then(|token| auth.tokens.validate(token))
            .map_err(|e| {
                debug!(error = %e, "rejected bearer token");
                AppError::unauthenticated(CREDENTIALS_ERROR)
            })?;

        match users::find_by_email(&auth.pool, &claims.sub).await {
            Ok(Some(user)) => Ok(AuthenticatedUser(user)),
            Ok(None) => {
                debug!(error = %AuthError::UnknownSubject, "rejected bearer token");
                Err(AppError::unauthenticated(CREDENTIALS_ERROR))
            }
            Err(e) => {
                error!(error = %e, "user lookup failed during authentication");
                Err(AppError::internal("authentication unavailable"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-0123456789abcdef";

    #[test]
    fn test_password_roundtrip() {
        let stored = hash_password("hunter22").unwrap();
        assert!(stored.starts_with("pbkdf2_sha256$100000$"));
        assert!(verify_password("hunter22", &stored));
        assert!(!verify_password("hunter23", &stored));
    }

    #[test]
    fn test_same_password_gets_different_salts() {
        let a = hash_password("pw").unwrap();
        let b = hash_password("pw").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("pw", &a));
        assert!(verify_password("pw", &b));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("pw", ""));
        assert!(!verify_password("pw", "plaintext"));
        assert!(!verify_password("pw", "bcrypt$10$abc$def"));
        assert!(!verify_password("pw", "pbkdf2_sha256$0$abc$def"));
        assert!(!verify_password("pw", "pbkdf2_sha256$1000$!!$!!"));
    }

    #[test]
    fn test_token_subject_roundtrip() {
        let issuer = TokenIssuer::new(SECRET, 30);
        let token = issuer.issue("writer@example.com").unwrap();
        let claims = issuer.validate(&token).unwrap();
        assert_eq!(claims.sub, "writer@example.com");
        assert!(claims.exp > chrono::Utc::now().timestamp());
    }

    #[test]
    fn test_expired_token_rejected() {
        let issuer = TokenIssuer::new(SECRET, 30);
        let token = issuer
            .issue_with_ttl("writer@example.com", chrono::Duration::minutes(-5))
            .unwrap();
        assert!(matches!(
            issuer.validate(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let token = TokenIssuer::new("another-secret-0123456789", 30)
            .issue("writer@example.com")
            .unwrap();
        assert!(TokenIssuer::new(SECRET, 30).validate(&token).is_err());
    }

    #[test]
    fn test_oversized_ttl_fails_without_panicking() {
        let issuer = TokenIssuer::new(SECRET, 1_000_000_000_000);
        assert!(matches!(
            issuer.issue("writer@example.com"),
            Err(AuthError::Issue(_))
        ));

        let issuer = TokenIssuer::new(SECRET, i64::MAX);
        assert!(matches!(
            issuer.issue("writer@example.com"),
            Err(AuthError::Issue(_))
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(TokenIssuer::new(SECRET, 30).validate("not.a.jwt").is_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let parts = |value: &str| {
            let (parts, _) = axum::http::Request::builder()
                .header(AUTHORIZATION, value)
                .body(())
                .unwrap()
                .into_parts();
            parts
        };
        assert_eq!(bearer_token(&parts("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&parts("bearer abc")).unwrap(), "abc");
        assert!(bearer_token(&parts("Basic abc")).is_err());
        assert!(bearer_token(&parts("Bearer ")).is_err());
        assert!(bearer_token(&parts("abc")).is_err());
    }
}
