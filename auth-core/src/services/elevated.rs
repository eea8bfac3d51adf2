//! Step-up authorization for sensitive operations.
//!
//! Explicit request/response state machine: `request_access` issues a
//! challenge set under a correlation id; `submit_challenges` or `cancel`
//! completes it. No cross-call closures. Pending challenges and granted
//! elevated sessions live in process-local maps with lazy TTL expiry.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::{
    AuditEvent, AuditKind, ElevatedSession, Principal, RISK_ELEVATED_CANCELLED,
    RISK_ELEVATED_DENIED, RISK_ELEVATED_GRANTED,
};
use crate::store::CredentialStore;
use crate::utils::Password;

use super::audit::AuditLogger;
use super::auth::verify_local_password;
use super::error::FailureReason;
use super::permissions::PermissionEngine;
use super::AuthError;

/// A single step-up verification requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Re-enter the account password.
    Password,
    /// Enter the one-time code sent out of band.
    OneTimeCode,
}

/// Challenge descriptors returned to the caller. Never reveals secrets.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeSet {
    pub challenge_id: Uuid,
    pub challenges: Vec<ChallengeKind>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of `request_access`.
#[derive(Debug, Clone)]
pub enum AccessRequest {
    /// A live elevated session already covers the requested set.
    Granted(ElevatedSession),
    /// Challenges must be satisfied first.
    Challenged(ChallengeSet),
}

/// Caller's answers to an issued challenge set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeResponses {
    pub password: Option<String>,
    pub code: Option<String>,
}

/// Outcome of `submit_challenges`.
#[derive(Debug, Clone)]
pub enum ElevatedOutcome {
    Granted(ElevatedSession),
    Denied { reason: FailureReason },
}

/// Out-of-band delivery for one-time codes.
#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send_code(&self, principal: &Principal, code: &str) -> Result<(), anyhow::Error>;
}

/// Test double capturing sent codes instead of delivering them.
#[derive(Default)]
pub struct MockCodeSender {
    sent: Mutex<Vec<(Uuid, String)>>,
}

impl MockCodeSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_code_for(&self, principal_id: Uuid) -> Option<String> {
        self.sent
            .lock()
            .expect("mock sender mutex poisoned")
            .iter()
            .rev()
            .find(|(id, _)| *id == principal_id)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl CodeSender for MockCodeSender {
    async fn send_code(&self, principal: &Principal, code: &str) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("mock sender mutex poisoned: {}", e))?
            .push((principal.id, code.to_string()));
        Ok(())
    }
}

struct PendingChallenge {
    principal_id: Uuid,
    required_permissions: Vec<String>,
    challenges: Vec<ChallengeKind>,
    code_hash: Option<String>,
    attempts: i32,
    expires_at: DateTime<Utc>,
}

/// Elevated-access engine.
#[derive(Clone)]
pub struct ElevatedAccessEngine {
    config: Arc<AuthConfig>,
    credentials: Arc<dyn CredentialStore>,
    permissions: PermissionEngine,
    audit: AuditLogger,
    sender: Arc<dyn CodeSender>,
    pending: Arc<DashMap<Uuid, PendingChallenge>>,
    sessions: Arc<DashMap<String, ElevatedSession>>,
}

impl ElevatedAccessEngine {
    pub fn new(
        config: AuthConfig,
        credentials: Arc<dyn CredentialStore>,
        permissions: PermissionEngine,
        audit: AuditLogger,
        sender: Arc<dyn CodeSender>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            credentials,
            permissions,
            audit,
            sender,
            pending: Arc::new(DashMap::new()),
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Request elevated access for a permission set.
    ///
    /// Idempotent short-circuit: a live elevated session already covering
    /// the set is returned as-is. Otherwise a challenge set is issued:
    /// password re-entry always, plus a one-time code when the principal has
    /// that factor enrolled.
    #[tracing::instrument(skip(self), fields(principal_id = %principal_id))]
    pub async fn request_access(
        &self,
        principal_id: Uuid,
        required_permissions: Vec<String>,
    ) -> Result<AccessRequest, AuthError> {
        let principal = self.load_active_principal(principal_id).await?;

        // Step-up confirms identity; it never mints permissions the
        // principal does not hold.
        if !self
            .permissions
            .has_all(principal_id, &required_permissions)
            .await?
        {
            return Err(AuthError::InsufficientPermissions);
        }

        let now = Utc::now();
        if let Some(existing) = self.find_live_session(principal_id, &required_permissions, now) {
            return Ok(AccessRequest::Granted(existing));
        }

        let mut challenges = vec![ChallengeKind::Password];
        let mut code_hash = None;
        if principal.second_factor_enrolled {
            let code = generate_code(self.config.elevated.code_length);
            code_hash = Some(hash_code(&code));
            self.sender
                .send_code(&principal, &code)
                .await
                .map_err(AuthError::Storage)?;
            challenges.push(ChallengeKind::OneTimeCode);
        }

        let challenge_id = Uuid::new_v4();
        let expires_at = now + Duration::seconds(self.config.elevated.code_ttl_seconds);
        self.pending.insert(
            challenge_id,
            PendingChallenge {
                principal_id,
                required_permissions,
                challenges: challenges.clone(),
                code_hash,
                attempts: 0,
                expires_at,
            },
        );

        self.audit
            .record(
                AuditEvent::new(AuditKind::ElevatedChallenge, &principal.username, true)
                    .principal(principal_id)
                    .detail(serde_json::json!({ "challenges": challenges })),
            )
            .await;

        Ok(AccessRequest::Challenged(ChallengeSet {
            challenge_id,
            challenges,
            expires_at,
        }))
    }

    /// Validate every issued challenge. All must pass; any single failure
    /// resolves the request as denied. Success creates an elevated session
    /// scoped to exactly the requested set, layered on the base session.
    #[tracing::instrument(skip(self, responses), fields(principal_id = %principal_id))]
    pub async fn submit_challenges(
        &self,
        principal_id: Uuid,
        challenge_id: Uuid,
        responses: ChallengeResponses,
    ) -> Result<ElevatedOutcome, AuthError> {
        let now = Utc::now();

        // Lazy expiry: an elapsed or unknown challenge requires a fresh
        // request_access.
        let expired = self
            .pending
            .get(&challenge_id)
            .map(|p| p.expires_at <= now || p.principal_id != principal_id)
            .unwrap_or(true);
        if expired {
            self.pending.remove(&challenge_id);
            return Err(AuthError::SessionExpired);
        }

        let principal = self.load_active_principal(principal_id).await?;

        let over_cap = {
            let mut entry = self
                .pending
                .get_mut(&challenge_id)
                .ok_or(AuthError::SessionExpired)?;
            entry.attempts += 1;
            entry.attempts > self.config.elevated.code_max_attempts
        };
        if over_cap {
            self.pending.remove(&challenge_id);
            return self.deny(&principal, FailureReason::InvalidPassword).await;
        }

        let (required_permissions, challenges, code_hash) = {
            let entry = self
                .pending
                .get(&challenge_id)
                .ok_or(AuthError::SessionExpired)?;
            (
                entry.required_permissions.clone(),
                entry.challenges.clone(),
                entry.code_hash.clone(),
            )
        };

        // Password re-entry, with the same lockout contract as sign-in.
        if challenges.contains(&ChallengeKind::Password) {
            let Some(password) = responses.password.as_deref() else {
                self.pending.remove(&challenge_id);
                return self.deny(&principal, FailureReason::InvalidPassword).await;
            };
            if let Err(e) = verify_local_password(
                self.credentials.as_ref(),
                &self.config.lockout,
                &principal,
                &Password::new(password),
            )
            .await
            {
                match e {
                    AuthError::InvalidPassword
                    | AuthError::AccountLocked { .. }
                    | AuthError::AccountDisabled => {
                        self.pending.remove(&challenge_id);
                        return self.deny(&principal, e.reason()).await;
                    }
                    other => return Err(other),
                }
            }
        }

        if challenges.contains(&ChallengeKind::OneTimeCode) {
            let submitted = responses.code.as_deref().unwrap_or("");
            let expected = code_hash.unwrap_or_default();
            let ok: bool = hash_code(submitted)
                .as_bytes()
                .ct_eq(expected.as_bytes())
                .into();
            if !ok {
                self.pending.remove(&challenge_id);
                return self.deny(&principal, FailureReason::InvalidPassword).await;
            }
        }

        self.pending.remove(&challenge_id);
        let session = ElevatedSession::new(
            principal_id,
            required_permissions,
            Duration::minutes(self.config.elevated.ttl_minutes),
        );
        self.sessions.insert(session.id.clone(), session.clone());

        self.audit
            .record(
                AuditEvent::new(AuditKind::ElevatedOutcome, &principal.username, true)
                    .principal(principal_id)
                    .session(&session.id)
                    .risk_score(RISK_ELEVATED_GRANTED)
                    .detail(serde_json::json!({ "permissions": session.permissions })),
            )
            .await;

        tracing::info!(
            principal_id = %principal_id,
            elevated_session_id = %session.id,
            "elevated access granted"
        );
        Ok(ElevatedOutcome::Granted(session))
    }

    /// Resolve a pending request as abandoned by the user. Distinct from a
    /// denial or timeout; the distinction is logged server-side only.
    pub async fn cancel(&self, principal_id: Uuid, challenge_id: Uuid) -> Result<(), AuthError> {
        let removed = self
            .pending
            .remove_if(&challenge_id, |_, p| p.principal_id == principal_id);

        if let Some((_, pending)) = removed {
            let username = self.username_of(principal_id).await;
            self.audit
                .record(
                    AuditEvent::new(AuditKind::ElevatedOutcome, username, false)
                        .principal(principal_id)
                        .failure_reason(FailureReason::UserCancelled.as_str())
                        .risk_score(RISK_ELEVATED_CANCELLED)
                        .detail(serde_json::json!({ "challenges": pending.challenges })),
                )
                .await;
        }
        Ok(())
    }

    /// Whether the elevated session is live, belongs to the principal and
    /// covers the required set. A session granted for P1 never satisfies
    /// P2 unless P2 is a subset of P1.
    pub fn check(
        &self,
        principal_id: Uuid,
        elevated_session_id: &str,
        required: &[String],
    ) -> bool {
        let now = Utc::now();
        // The map guard must be released before remove() takes the write
        // lock on the same shard, so liveness is resolved up front.
        let state = self.sessions.get(elevated_session_id).map(|session| {
            (
                session.is_live(now),
                session.principal_id == principal_id && session.covers(required),
            )
        });
        match state {
            Some((true, covered)) => covered,
            Some((false, _)) => {
                self.sessions.remove(elevated_session_id);
                false
            }
            None => false,
        }
    }

    /// Holder-initiated early termination.
    pub fn revoke(&self, elevated_session_id: &str) {
        self.sessions.remove(elevated_session_id);
    }

    /// Opportunistic sweep of expired state. Liveness never depends on it.
    pub fn cleanup(&self) -> (usize, usize) {
        let now = Utc::now();
        let pending_before = self.pending.len();
        self.pending.retain(|_, p| p.expires_at > now);
        let sessions_before = self.sessions.len();
        self.sessions.retain(|_, s| s.is_live(now));
        (
            pending_before - self.pending.len(),
            sessions_before - self.sessions.len(),
        )
    }

    fn find_live_session(
        &self,
        principal_id: Uuid,
        required: &[String],
        now: DateTime<Utc>,
    ) -> Option<ElevatedSession> {
        self.sessions.iter().find_map(|entry| {
            let session = entry.value();
            (session.principal_id == principal_id
                && session.is_live(now)
                && session.covers(required))
            .then(|| session.clone())
        })
    }

    async fn deny(
        &self,
        principal: &Principal,
        reason: FailureReason,
    ) -> Result<ElevatedOutcome, AuthError> {
        self.audit
            .record(
                AuditEvent::new(AuditKind::ElevatedOutcome, &principal.username, false)
                    .principal(principal.id)
                    .failure_reason(reason.as_str())
                    .risk_score(RISK_ELEVATED_DENIED),
            )
            .await;
        tracing::warn!(
            principal_id = %principal.id,
            reason = reason.as_str(),
            "elevated access denied"
        );
        Ok(ElevatedOutcome::Denied { reason })
    }

    async fn load_active_principal(&self, principal_id: Uuid) -> Result<Principal, AuthError> {
        let principal = self
            .credentials
            .find_principal(principal_id)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::UserNotFound)?;
        if !principal.is_active {
            return Err(AuthError::AccountDisabled);
        }
        Ok(principal)
    }

    async fn username_of(&self, principal_id: Uuid) -> String {
        self.credentials
            .find_principal(principal_id)
            .await
            .ok()
            .flatten()
            .map(|p| p.username)
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length).map(|_| rng.gen_range(0..10).to_string()).collect()
}

fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_numeric_and_sized() {
        let code = generate_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn code_hash_is_deterministic() {
        assert_eq!(hash_code("123456"), hash_code("123456"));
        assert_ne!(hash_code("123456"), hash_code("123457"));
    }
}
