//! Redis adapter for the session store.
//!
//! Session records are stored as JSON under `authcore:session:<id>` with a
//! Redis TTL slightly past the record's own `expires_at`; a per-principal set
//! indexes sessions for revoke-all. The Redis TTL is hygiene only - liveness
//! is decided by the record fields, so a refreshed or revoked session behaves
//! correctly even before the key expires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, Client};
use uuid::Uuid;

use crate::models::Session;

use super::SessionStore;

const SESSION_KEY_PREFIX: &str = "authcore:session:";
const PRINCIPAL_KEY_PREFIX: &str = "authcore:principal:";

/// Keys linger this long past `expires_at` so a lazy expiry check can still
/// observe the record instead of a bare miss.
const EXPIRY_GRACE_SECONDS: i64 = 300;

#[derive(Clone)]
pub struct RedisSessionStore {
    manager: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %url, "Connecting to Redis session store");
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;
        Ok(Self { manager })
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }

    fn session_key(session_id: &str) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, session_id)
    }

    fn principal_key(principal_id: Uuid) -> String {
        format!("{}{}", PRINCIPAL_KEY_PREFIX, principal_id)
    }

    fn ttl_seconds(session: &Session) -> i64 {
        let remaining = (session.expires_at - Utc::now()).num_seconds();
        remaining.max(1) + EXPIRY_GRACE_SECONDS
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::session_key(session_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read session: {}", e))?;
        raw.map(|s| {
            serde_json::from_str(&s).map_err(|e| anyhow::anyhow!("Corrupt session record: {}", e))
        })
        .transpose()
    }

    /// Write back an updated record, preserving the existing key TTL.
    async fn store_keepttl(&self, session: &Session) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw = serde_json::to_string(session)?;
        redis::cmd("SET")
            .arg(Self::session_key(&session.id))
            .arg(raw)
            .arg("KEEPTTL")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write session: {}", e))
    }

    async fn update<F>(&self, session_id: &str, mutate: F) -> Result<(), anyhow::Error>
    where
        F: FnOnce(&mut Session),
    {
        if let Some(mut session) = self.load(session_id).await? {
            mutate(&mut session);
            self.store_keepttl(&session).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error> {
        self.load(session_id).await
    }

    async fn insert(&self, session: &Session) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw = serde_json::to_string(session)?;

        redis::cmd("SET")
            .arg(Self::session_key(&session.id))
            .arg(raw)
            .arg("EX")
            .arg(Self::ttl_seconds(session))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write session: {}", e))?;

        redis::cmd("SADD")
            .arg(Self::principal_key(session.principal_id))
            .arg(&session.id)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to index session: {}", e))
    }

    async fn touch_activity(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        self.update(session_id, |s| s.last_activity = at).await
    }

    async fn set_expiry(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        if let Some(mut session) = self.load(session_id).await? {
            session.expires_at = expires_at;
            let mut conn = self.manager.clone();
            let raw = serde_json::to_string(&session)?;
            redis::cmd("SET")
                .arg(Self::session_key(session_id))
                .arg(raw)
                .arg("EX")
                .arg(Self::ttl_seconds(&session))
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to refresh session: {}", e))?;
        }
        Ok(())
    }

    async fn deactivate(&self, session_id: &str) -> Result<(), anyhow::Error> {
        self.update(session_id, |s| s.is_active = false).await
    }

    async fn deactivate_all_for(&self, principal_id: Uuid) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let session_ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(Self::principal_key(principal_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list principal sessions: {}", e))?;

        let mut count = 0u64;
        for session_id in session_ids {
            if let Some(mut session) = self.load(&session_id).await? {
                if session.is_active {
                    session.is_active = false;
                    self.store_keepttl(&session).await?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn flag_suspicious(&self, session_id: &str) -> Result<(), anyhow::Error> {
        self.update(session_id, |s| s.is_suspicious = true).await
    }

    async fn cleanup_expired(&self, _now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        // Redis evicts expired keys itself; nothing to sweep.
        Ok(0)
    }
}
