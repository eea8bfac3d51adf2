//! Session models - server-tracked sign-ins and short-lived elevated grants.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::principal::AuthMethod;

/// Client context captured at sign-in. Non-secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
}

/// Server-tracked session record.
///
/// Independent of the bearer token's own expiry claim: revoking the session
/// must take effect on the next verify even while the token is still
/// cryptographically valid, so the store lookup is mandatory, not a cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque, unguessable id (256 bits of randomness, hex-encoded).
    pub id: String,
    pub principal_id: Uuid,
    /// SHA-256 of the issued bearer token. The raw token is never stored.
    pub token_hash: String,
    pub method: AuthMethod,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_suspicious: bool,
    pub client: ClientInfo,
}

impl Session {
    pub fn new(
        principal_id: Uuid,
        token_hash: String,
        method: AuthMethod,
        ttl: Duration,
        client: ClientInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_session_id(),
            principal_id,
            token_hash,
            method,
            is_active: true,
            created_at: now,
            expires_at: now + ttl,
            last_activity: now,
            is_suspicious: false,
            client,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Live means active and not past expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }
}

/// Short-TTL authorization layered on top of a base session, scoped to
/// exactly the permission set it was requested for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevatedSession {
    pub id: String,
    pub principal_id: Uuid,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ElevatedSession {
    pub fn new(principal_id: Uuid, mut permissions: Vec<String>, ttl: Duration) -> Self {
        permissions.sort();
        permissions.dedup();
        let now = Utc::now();
        Self {
            id: new_session_id(),
            principal_id,
            permissions,
            is_active: true,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }

    /// Whether this grant covers every permission in `required`.
    pub fn covers(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|p| self.permissions.iter().any(|held| held == p))
    }
}

/// Generate an opaque session id: 32 random bytes, hex-encoded.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}
