//! Signed bearer tokens.
//!
//! Verification proves the token is unforged and unexpired. It does NOT prove
//! the session is still active; that lives in the session store and is
//! checked on every verify.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::TokenConfig;

use super::AuthError;

/// Claims embedded in a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (principal id).
    pub sub: String,
    /// Session id.
    pub sid: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
}

impl SessionClaims {
    pub fn principal_id(&self) -> Result<Uuid, AuthError> {
        self.sub.parse().map_err(|_| AuthError::TokenInvalid)
    }
}

/// HS256 token codec.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    leeway_seconds: u64,
}

impl TokenCodec {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            leeway_seconds: config.leeway_seconds,
        }
    }

    /// Issue a token bound to {principal, session}, expiring with the session.
    pub fn issue(
        &self,
        principal_id: Uuid,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = SessionClaims {
            sub: principal_id.to_string(),
            sid: session_id.to_string(),
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Storage(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    /// Validate signature and expiry; returns the claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = self.leeway_seconds;

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::TokenInvalid)
    }
}

/// SHA-256 hex digest of a token, for at-rest storage on the session record.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn codec() -> TokenCodec {
        TokenCodec::new(&TokenConfig {
            secret: "unit-test-secret-0123456789abcdefghij".to_string(),
            leeway_seconds: 0,
        })
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let codec = codec();
        let principal_id = Uuid::new_v4();
        let token = codec
            .issue(principal_id, "sess-1", Utc::now() + Duration::hours(24))
            .expect("issue");

        let claims = codec.verify(&token).expect("verify");
        assert_eq!(claims.principal_id().expect("uuid"), principal_id);
        assert_eq!(claims.sid, "sess-1");
    }

    #[test]
    fn tampered_token_is_rejected() {
        let codec = codec();
        let token = codec
            .issue(Uuid::new_v4(), "sess-1", Utc::now() + Duration::hours(1))
            .expect("issue");

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            codec.verify(&tampered),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = codec()
            .issue(Uuid::new_v4(), "sess-1", Utc::now() + Duration::hours(1))
            .expect("issue");

        let other = TokenCodec::new(&TokenConfig {
            secret: "a-different-secret-0123456789abcdefgh".to_string(),
            leeway_seconds: 0,
        });
        assert!(matches!(other.verify(&token), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = codec();
        let token = codec
            .issue(Uuid::new_v4(), "sess-1", Utc::now() - Duration::hours(1))
            .expect("issue");
        assert!(matches!(codec.verify(&token), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let a = hash_token("abc");
        let b = hash_token("abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_token("abd"));
    }
}
