//! Sign-in orchestration: strategy selection, session lifecycle, password
//! change and the audit surface.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{AuthConfig, FallbackPolicy, LockoutConfig};
use crate::directory::{DirectoryClient, DirectoryError, DirectoryPrincipal};
use crate::models::{
    AuditEvent, AuditFilter, AuditKind, AuthMethod, ClientInfo, GroupOrigin, Principal,
    PrincipalView, Session, ADMIN_PERMISSION, AUDIT_VIEW_PERMISSION, DIRECTORY_SYNC_ASSIGNER,
    RISK_SIGN_IN_FAILURE, RISK_SIGN_IN_SUCCESS,
};
use crate::store::{AccessStore, AuditStore, CredentialStore, SessionStore};
use crate::utils::{hash_password, verify_password, Password};

use super::audit::AuditLogger;
use super::permissions::PermissionEngine;
use super::policy;
use super::token::{hash_token, TokenCodec};
use super::AuthError;

/// Result of a successful sign-in, handed to the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct SignInOutcome {
    pub principal: PrincipalView,
    pub permissions: Vec<String>,
    pub groups: Vec<String>,
    pub session_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub method: AuthMethod,
}

/// Result of a successful verify.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedAccess {
    pub principal: PrincipalView,
    pub permissions: Vec<String>,
    pub groups: Vec<String>,
    pub session_id: String,
}

/// Sign-in orchestrator. All collaborators are injected at construction and
/// the configuration is immutable, so one instance behaves deterministically.
#[derive(Clone)]
pub struct AuthEngine {
    config: Arc<AuthConfig>,
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn DirectoryClient>,
    codec: TokenCodec,
    permissions: PermissionEngine,
    audit: AuditLogger,
}

impl AuthEngine {
    pub fn new(
        config: AuthConfig,
        credentials: Arc<dyn CredentialStore>,
        access: Arc<dyn AccessStore>,
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn DirectoryClient>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        let codec = TokenCodec::new(&config.token);
        Self {
            config: Arc::new(config),
            credentials,
            sessions,
            directory,
            codec,
            permissions: PermissionEngine::new(access),
            audit: AuditLogger::new(audit_store),
        }
    }

    pub fn permission_engine(&self) -> PermissionEngine {
        self.permissions.clone()
    }

    pub fn audit_logger(&self) -> AuditLogger {
        self.audit.clone()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Authenticate and open a session.
    ///
    /// Tries the configured (or caller-preferred) primary method, then the
    /// secondary according to the fallback policy. Emits exactly one audit
    /// event per attempt, success or failure.
    #[tracing::instrument(skip(self, password, client), fields(username = %username))]
    pub async fn sign_in(
        &self,
        username: &str,
        password: &str,
        client: ClientInfo,
        preferred: Option<AuthMethod>,
    ) -> Result<SignInOutcome, AuthError> {
        let order = self.strategy_order(preferred);
        if order.is_empty() {
            let err = AuthError::AllMethodsFailed;
            self.audit_sign_in_failure(username, None, None, &err).await;
            return Err(err);
        }

        let mut attempted = 0usize;
        let mut last: Option<(AuthMethod, AuthError)> = None;

        for (idx, method) in order.iter().copied().enumerate() {
            attempted += 1;
            match self.attempt(method, username, password).await {
                Ok(principal) => {
                    return self.open_session(principal, method, client).await;
                }
                Err(err) => {
                    tracing::debug!(
                        method = method.as_str(),
                        reason = err.reason().as_str(),
                        "sign-in attempt failed"
                    );
                    let may_fall_back = idx + 1 < order.len()
                        && match self.config.strategy.fallback {
                            FallbackPolicy::Always => true,
                            FallbackPolicy::OnUnavailable => err.is_unavailable(),
                            FallbackPolicy::Never => false,
                        };
                    last = Some((method, err));
                    if !may_fall_back {
                        break;
                    }
                }
            }
        }

        // Both methods attempted and failed: collapse to a generic failure.
        // A single attempted method surfaces its own taxonomy member.
        let (method, err) = last.unwrap_or((self.config.strategy.primary, AuthError::AllMethodsFailed));
        let err = if attempted > 1 {
            AuthError::AllMethodsFailed
        } else {
            err
        };
        let principal_id = self
            .credentials
            .find_principal_by_username(username)
            .await
            .ok()
            .flatten()
            .map(|p| p.id);
        self.audit_sign_in_failure(username, principal_id, Some(method), &err)
            .await;
        Err(err)
    }

    fn strategy_order(&self, preferred: Option<AuthMethod>) -> Vec<AuthMethod> {
        let primary = preferred.unwrap_or(self.config.strategy.primary);
        let secondary = match primary {
            AuthMethod::Local => AuthMethod::Directory,
            AuthMethod::Directory => AuthMethod::Local,
        };
        [primary, secondary]
            .into_iter()
            .filter(|m| match m {
                AuthMethod::Local => self.config.strategy.local_enabled,
                AuthMethod::Directory => self.config.strategy.directory_enabled,
            })
            .collect()
    }

    async fn attempt(
        &self,
        method: AuthMethod,
        username: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        match method {
            AuthMethod::Local => self.attempt_local(username, password).await,
            AuthMethod::Directory => self.attempt_directory(username, password).await,
        }
    }

    async fn attempt_local(&self, username: &str, password: &str) -> Result<Principal, AuthError> {
        let principal = self
            .credentials
            .find_principal_by_username(username)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::UserNotFound)?;

        verify_local_password(
            self.credentials.as_ref(),
            &self.config.lockout,
            &principal,
            &Password::new(password),
        )
        .await?;

        // Re-load so the caller sees the zeroed counter.
        self.credentials
            .find_principal(principal.id)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::UserNotFound)
    }

    async fn attempt_directory(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        let timeout = StdDuration::from_secs(self.config.directory.bind_timeout_seconds);
        let bound = match tokio::time::timeout(timeout, self.directory.bind(username, password))
            .await
        {
            Err(_) => {
                return Err(AuthError::DirectoryUnavailable(anyhow::anyhow!(
                    "directory bind timed out after {}s",
                    self.config.directory.bind_timeout_seconds
                )))
            }
            Ok(Err(DirectoryError::InvalidCredentials)) => return Err(AuthError::DirectoryAuthFailed),
            Ok(Err(e)) => return Err(AuthError::DirectoryUnavailable(anyhow::anyhow!(e))),
            Ok(Ok(bound)) => bound,
        };

        let principal = self
            .credentials
            .upsert_directory_principal(&bound)
            .await
            .map_err(AuthError::Storage)?;

        if !principal.is_active {
            return Err(AuthError::AccountDisabled);
        }

        self.reconcile_memberships(principal.id, &bound).await?;
        Ok(principal)
    }

    /// Reconcile directory-origin memberships against the bind result.
    ///
    /// Local and system memberships are never touched. When the returned
    /// group list is flagged incomplete (server-side paging), memberships
    /// are added but never deactivated off the partial list.
    async fn reconcile_memberships(
        &self,
        principal_id: Uuid,
        bound: &DirectoryPrincipal,
    ) -> Result<(), AuthError> {
        let access = self.permissions.access();
        let existing = access
            .memberships_for(principal_id)
            .await
            .map_err(AuthError::Storage)?;

        let returned: BTreeSet<&str> = bound.groups.iter().map(|g| g.as_str()).collect();

        for name in &bound.groups {
            let group = access
                .upsert_group(name, GroupOrigin::Directory)
                .await
                .map_err(AuthError::Storage)?;
            let already_active = existing
                .iter()
                .any(|m| m.group_id == group.id && m.is_active);
            if !already_active {
                access
                    .add_membership(principal_id, group.id, DIRECTORY_SYNC_ASSIGNER)
                    .await
                    .map_err(AuthError::Storage)?;
            }
        }

        if !bound.groups_complete {
            tracing::warn!(
                principal_id = %principal_id,
                "directory returned a partial group list; skipping membership deactivation"
            );
            return Ok(());
        }

        for membership in existing.iter().filter(|m| m.is_active) {
            let group = access
                .find_group(membership.group_id)
                .await
                .map_err(AuthError::Storage)?;
            let Some(group) = group else { continue };
            if group.origin == GroupOrigin::Directory && !returned.contains(group.name.as_str()) {
                access
                    .deactivate_membership(principal_id, membership.group_id)
                    .await
                    .map_err(AuthError::Storage)?;
            }
        }
        Ok(())
    }

    async fn open_session(
        &self,
        principal: Principal,
        method: AuthMethod,
        client: ClientInfo,
    ) -> Result<SignInOutcome, AuthError> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(self.config.session.ttl_hours);
        let session_id = crate::models::new_session_id();

        let token = self.codec.issue(principal.id, &session_id, expires_at)?;
        let session = Session {
            id: session_id.clone(),
            principal_id: principal.id,
            token_hash: hash_token(&token),
            method,
            is_active: true,
            created_at: now,
            expires_at,
            last_activity: now,
            is_suspicious: false,
            client,
        };
        self.sessions
            .insert(&session)
            .await
            .map_err(AuthError::Storage)?;

        self.credentials
            .touch_last_login(principal.id, now)
            .await
            .map_err(AuthError::Storage)?;

        let permissions = self.permissions.effective_permissions(principal.id).await?;
        let groups = self.permissions.groups(principal.id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditKind::SignIn, &principal.username, true)
                    .principal(principal.id)
                    .method(method)
                    .session(&session_id)
                    .risk_score(RISK_SIGN_IN_SUCCESS),
            )
            .await;

        tracing::info!(
            principal_id = %principal.id,
            method = method.as_str(),
            session_id = %session_id,
            "sign-in succeeded"
        );

        Ok(SignInOutcome {
            principal: principal.sanitized(),
            permissions: permissions.into_iter().collect(),
            groups,
            session_id,
            token,
            expires_at,
            method,
        })
    }

    async fn audit_sign_in_failure(
        &self,
        username: &str,
        principal_id: Option<Uuid>,
        method: Option<AuthMethod>,
        err: &AuthError,
    ) {
        if matches!(err, AuthError::DirectoryUnavailable(_) | AuthError::Storage(_)) {
            tracing::error!(username = %username, error = %err, "sign-in infrastructure failure");
        }
        let mut event = AuditEvent::new(AuditKind::SignIn, username, false)
            .failure_reason(err.reason().as_str())
            .risk_score(RISK_SIGN_IN_FAILURE);
        if let Some(id) = principal_id {
            event = event.principal(id);
        }
        if let Some(method) = method {
            event = event.method(method);
        }
        self.audit.record(event).await;
    }

    /// Validate a bearer token and its backing session.
    ///
    /// The session-store lookup is mandatory: a revoked session must fail
    /// here even while the token is still cryptographically valid.
    /// Permissions are recomputed fresh on every call.
    pub async fn verify(&self, token: &str) -> Result<VerifiedAccess, AuthError> {
        let claims = self.codec.verify(token)?;
        let principal_id = claims.principal_id()?;
        let now = Utc::now();

        let session = self
            .sessions
            .get(&claims.sid)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::SessionExpired)?;

        if !session.is_active {
            return Err(AuthError::SessionExpired);
        }
        if session.is_expired(now) {
            // Lazy expiry: mark it dead on first observation.
            self.sessions
                .deactivate(&session.id)
                .await
                .map_err(AuthError::Storage)?;
            return Err(AuthError::SessionExpired);
        }
        if session.token_hash != hash_token(token) {
            return Err(AuthError::TokenInvalid);
        }
        if session.principal_id != principal_id {
            return Err(AuthError::TokenInvalid);
        }

        let principal = self
            .credentials
            .find_principal(principal_id)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::UserNotFound)?;
        if !principal.is_active {
            return Err(AuthError::AccountDisabled);
        }

        self.sessions
            .touch_activity(&session.id, now)
            .await
            .map_err(AuthError::Storage)?;

        let permissions = self.permissions.effective_permissions(principal_id).await?;
        let groups = self.permissions.groups(principal_id).await?;

        Ok(VerifiedAccess {
            principal: principal.sanitized(),
            permissions: permissions.into_iter().collect(),
            groups,
            session_id: session.id,
        })
    }

    /// Extend a currently valid session by a full TTL from now.
    ///
    /// The session id and token are not rotated; callers needing rotation
    /// sign out and back in.
    pub async fn refresh(&self, session_id: &str) -> Result<DateTime<Utc>, AuthError> {
        let now = Utc::now();
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::SessionExpired)?;

        if !session.is_live(now) {
            return Err(AuthError::SessionExpired);
        }

        let expires_at = now + Duration::hours(self.config.session.ttl_hours);
        self.sessions
            .set_expiry(session_id, expires_at)
            .await
            .map_err(AuthError::Storage)?;

        self.audit
            .record(
                AuditEvent::new(AuditKind::SessionRefresh, self.username_of(session.principal_id).await, true)
                    .principal(session.principal_id)
                    .session(session_id),
            )
            .await;

        Ok(expires_at)
    }

    /// Revoke one session. Takes effect on the next verify.
    pub async fn sign_out(&self, session_id: &str) -> Result<(), AuthError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(AuthError::Storage)?;

        self.sessions
            .deactivate(session_id)
            .await
            .map_err(AuthError::Storage)?;

        if let Some(session) = session {
            self.audit
                .record(
                    AuditEvent::new(
                        AuditKind::SignOut,
                        self.username_of(session.principal_id).await,
                        true,
                    )
                    .principal(session.principal_id)
                    .session(session_id),
                )
                .await;
        }
        Ok(())
    }

    /// Revoke every active session of a principal.
    pub async fn revoke_all_sessions(&self, principal_id: Uuid) -> Result<u64, AuthError> {
        let count = self
            .sessions
            .deactivate_all_for(principal_id)
            .await
            .map_err(AuthError::Storage)?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditKind::SessionRevokeAll,
                    self.username_of(principal_id).await,
                    true,
                )
                .principal(principal_id)
                .detail(serde_json::json!({ "revoked": count })),
            )
            .await;

        tracing::info!(principal_id = %principal_id, revoked = count, "revoked all sessions");
        Ok(count)
    }

    /// Operator hook for the UI layer.
    pub async fn flag_session_suspicious(&self, session_id: &str) -> Result<(), AuthError> {
        self.sessions
            .flag_suspicious(session_id)
            .await
            .map_err(AuthError::Storage)
    }

    /// Change a local principal's password.
    ///
    /// Directory-origin principals are rejected with `directory_managed`.
    /// The old password goes through the same lockout-checked verification
    /// as sign-in; the new one is checked against policy and recent history.
    pub async fn change_password(
        &self,
        principal_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let result = self
            .change_password_inner(principal_id, old_password, new_password)
            .await;

        let event = AuditEvent::new(
            AuditKind::PasswordChange,
            self.username_of(principal_id).await,
            result.is_ok(),
        )
        .principal(principal_id);
        let event = match &result {
            Ok(()) => event,
            Err(e) => event
                .failure_reason(e.reason().as_str())
                .risk_score(RISK_SIGN_IN_FAILURE),
        };
        self.audit.record(event).await;
        result
    }

    async fn change_password_inner(
        &self,
        principal_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let principal = self
            .credentials
            .find_principal(principal_id)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::UserNotFound)?;

        if principal.origin != AuthMethod::Local {
            return Err(AuthError::DirectoryManaged);
        }

        verify_local_password(
            self.credentials.as_ref(),
            &self.config.lockout,
            &principal,
            &Password::new(old_password),
        )
        .await?;

        policy::validate_password(new_password, &self.config.password)?;

        let candidate = Password::new(new_password);
        let recent = self
            .credentials
            .recent_password_hashes(principal_id, self.config.password.history_depth)
            .await
            .map_err(AuthError::Storage)?;
        for hash in recent.iter().chain(principal.password_hash.iter()) {
            if verify_password(&candidate, hash).unwrap_or(false) {
                return Err(AuthError::PasswordReuse);
            }
        }

        let new_hash = hash_password(&candidate).map_err(AuthError::Storage)?;
        self.credentials
            .update_password_hash(principal_id, &new_hash)
            .await
            .map_err(AuthError::Storage)?;
        self.credentials
            .append_password_history(principal_id, &new_hash)
            .await
            .map_err(AuthError::Storage)?;

        if self.config.session.revoke_on_password_change {
            self.sessions
                .deactivate_all_for(principal_id)
                .await
                .map_err(AuthError::Storage)?;
        }

        tracing::info!(principal_id = %principal_id, "password changed");
        Ok(())
    }

    /// Create a local account. Password must satisfy the configured policy.
    pub async fn provision_local(
        &self,
        username: &str,
        password: &str,
        email: Option<String>,
    ) -> Result<PrincipalView, AuthError> {
        policy::validate_password(password, &self.config.password)?;

        let hash = hash_password(&Password::new(password)).map_err(AuthError::Storage)?;
        let principal = Principal::new_local(username.to_string(), hash.clone(), email);
        self.credentials
            .insert_principal(&principal)
            .await
            .map_err(AuthError::Storage)?;
        self.credentials
            .append_password_history(principal.id, &hash)
            .await
            .map_err(AuthError::Storage)?;

        tracing::info!(principal_id = %principal.id, username = %username, "provisioned local principal");
        Ok(principal.sanitized())
    }

    /// Enroll the one-time-code challenge factor for a principal.
    pub async fn enroll_second_factor(&self, principal_id: Uuid) -> Result<(), AuthError> {
        self.credentials
            .set_second_factor_enrolled(principal_id, true)
            .await
            .map_err(AuthError::Storage)
    }

    /// Read the audit trail. Gated on `admin` or the dedicated audit-view
    /// permission.
    pub async fn audit_events(
        &self,
        actor_id: Uuid,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AuthError> {
        self.permissions
            .require_any(actor_id, &[ADMIN_PERMISSION, AUDIT_VIEW_PERMISSION])
            .await?;
        self.audit_store_query(filter, limit).await
    }

    async fn audit_store_query(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AuthError> {
        self.audit
            .store()
            .query(filter, limit)
            .await
            .map_err(AuthError::Storage)
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

/// Local password verification with the full lockout contract, shared by
/// primary sign-in, password change and elevated-access re-verification.
///
/// Checks: active account, current lockout, hash match. On mismatch the
/// counter increment happens at the storage layer (atomic) and crossing the
/// threshold sets `locked_until`. On match the counter and lockout are
/// cleared.
pub(crate) async fn verify_local_password(
    credentials: &dyn CredentialStore,
    lockout: &LockoutConfig,
    principal: &Principal,
    password: &Password,
) -> Result<(), AuthError> {
    let now = Utc::now();

    if !principal.is_active {
        return Err(AuthError::AccountDisabled);
    }
    if let Some(until) = principal.locked_until {
        if until > now {
            return Err(AuthError::AccountLocked { until });
        }
    }

    let Some(hash) = principal.password_hash.as_deref() else {
        // No local credential on record (directory-origin account).
        return Err(AuthError::InvalidPassword);
    };

    let matches = verify_password(password, hash).map_err(AuthError::Storage)?;
    if matches {
        credentials
            .reset_lockout(principal.id)
            .await
            .map_err(AuthError::Storage)?;
        return Ok(());
    }

    let attempts = credentials
        .increment_failed_attempts(principal.id)
        .await
        .map_err(AuthError::Storage)?;
    if attempts >= lockout.max_failed_attempts {
        let until = now + Duration::minutes(lockout.lockout_minutes);
        credentials
            .set_lockout(principal.id, until)
            .await
            .map_err(AuthError::Storage)?;
        tracing::warn!(
            principal_id = %principal.id,
            attempts,
            "account locked after repeated failed attempts"
        );
    }
    Err(AuthError::InvalidPassword)
}
