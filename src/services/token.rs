//! Access token service
//!
//! WOPI access tokens are HS256 JWTs binding a session id to an expiry.
//! Tokens are verifiable offline, but the session row stays the authority:
//! after signature verification the handlers reload the session and check
//! its own `expires_at` independently.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Token validation error
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

/// JWT claims carried by an access token
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Session id
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Issues and validates signed access tokens
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Sign a token for a session. The expiry must equal the session row's
    /// `expires_at` so both checks agree.
    pub fn issue(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let claims = TokenClaims {
            sub: session_id.to_string(),
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to sign access token: {}", e))
    }

    /// Verify a token's signature and expiry, returning its claims
    pub fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        decode::<TokenClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}
