//! Business-logic engines.

pub mod audit;
pub mod auth;
pub mod cipher;
pub mod elevated;
pub mod error;
pub mod permissions;
pub mod policy;
pub mod token;

pub use audit::AuditLogger;
pub use auth::{AuthEngine, SignInOutcome, VerifiedAccess};
pub use cipher::{decrypt_secret, encrypt_secret, DeviceFingerprint, CIPHER_ALGORITHM};
pub use elevated::{
    AccessRequest, ChallengeKind, ChallengeResponses, ChallengeSet, CodeSender,
    ElevatedAccessEngine, ElevatedOutcome, MockCodeSender,
};
pub use error::{AuthError, FailureReason};
pub use permissions::PermissionEngine;
pub use policy::PolicyError;
pub use token::{hash_token, SessionClaims, TokenCodec};
