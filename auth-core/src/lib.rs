//! Authentication and authorization core for the phone-number inventory
//! application.
//!
//! Dual-method sign-in (local credential store / directory-service bind)
//! with configurable precedence and fallback, signed-session issuance and
//! revocation, group/permission resolution with explicit-deny override, a
//! short-lived elevated-access challenge flow for dangerous operations, and
//! session+device-bound encryption for at-rest secrets.
//!
//! The UI/API layer, the phone-number record store, CSV import and report
//! generation are external collaborators; this crate exposes only the
//! sign-in / verify / permission-check surface they consume.

pub mod config;
pub mod directory;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::{AuthConfig, FallbackPolicy};
pub use services::{
    AccessRequest, AuthEngine, AuthError, ChallengeKind, ChallengeResponses, ElevatedAccessEngine,
    ElevatedOutcome, FailureReason, PermissionEngine, SignInOutcome, VerifiedAccess,
};
