//! Encrypted-secret blob stored by configuration management.

use serde::{Deserialize, Serialize};

/// Opaque encrypted secret. The core never stores the plaintext.
///
/// All fields are base64-encoded except the algorithm tag, which doubles as
/// the AEAD associated data so a blob cannot be silently re-labelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub nonce: String,
    pub salt: String,
    pub algorithm: String,
}
