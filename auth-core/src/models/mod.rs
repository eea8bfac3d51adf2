//! Domain models for the authentication core.

mod audit;
mod group;
mod permission;
mod principal;
mod secret;
mod session;

pub use audit::{
    AuditEvent, AuditFilter, AuditKind, RISK_ELEVATED_CANCELLED, RISK_ELEVATED_DENIED,
    RISK_ELEVATED_GRANTED, RISK_SIGN_IN_FAILURE, RISK_SIGN_IN_SUCCESS,
};
pub use group::{Group, GroupOrigin, Membership, DIRECTORY_SYNC_ASSIGNER};
pub use permission::{
    DirectGrant, GroupGrant, Permission, PrincipalGrant, ADMIN_PERMISSION, AUDIT_VIEW_PERMISSION,
};
pub use principal::{AuthMethod, Principal, PrincipalView};
pub use secret::EncryptedSecret;
pub use session::{new_session_id, ClientInfo, ElevatedSession, Session};
