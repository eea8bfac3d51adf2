//! Session+device-bound encryption for at-rest secrets.
//!
//! Protects directory bind passwords and third-party credentials held in
//! configuration records - never session tokens themselves. The key is
//! derived from the session token and a device fingerprint, so a blob is
//! only decryptable from the same session on the same device; any mismatch
//! fails closed on the AEAD tag.

use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::models::EncryptedSecret;

/// Algorithm tag stored on every blob and bound into the AEAD as associated
/// data.
pub const CIPHER_ALGORITHM: &str = "argon2id-chacha20poly1305-v1";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Non-secret client tuple mixed into key derivation. Scopes decryption to
/// "this session, this device", not merely "knows a passphrase".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub user_agent: String,
    pub screen: String,
    pub timezone: String,
    pub locale: String,
}

impl DeviceFingerprint {
    fn context(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.user_agent, self.screen, self.timezone, self.locale
        )
    }
}

fn derive_key(
    session_token: &str,
    fingerprint: &DeviceFingerprint,
    salt: &[u8],
) -> Result<[u8; KEY_LEN], anyhow::Error> {
    let context = format!(
        "credential-cipher:v1|{}|{}",
        session_token,
        fingerprint.context()
    );
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(context.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("Key derivation failed: {}", e))?;
    Ok(key)
}

/// Encrypt a secret under the current session token and device fingerprint.
/// A fresh random salt and nonce are drawn per call.
pub fn encrypt_secret(
    plaintext: &[u8],
    session_token: &str,
    fingerprint: &DeviceFingerprint,
) -> Result<EncryptedSecret, anyhow::Error> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let key = derive_key(session_token, fingerprint, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: CIPHER_ALGORITHM.as_bytes(),
            },
        )
        .map_err(|e| anyhow::anyhow!("Encryption failure: {}", e))?;

    Ok(EncryptedSecret {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce_bytes),
        salt: BASE64.encode(salt),
        algorithm: CIPHER_ALGORITHM.to_string(),
    })
}

/// Decrypt a blob. Rebuilds the key-derivation context from the *current*
/// session token and fingerprint; a wrong token, wrong device or tampered
/// blob fails the AEAD tag check rather than returning garbage.
pub fn decrypt_secret(
    secret: &EncryptedSecret,
    session_token: &str,
    fingerprint: &DeviceFingerprint,
) -> Result<Vec<u8>, anyhow::Error> {
    let salt = BASE64
        .decode(&secret.salt)
        .map_err(|e| anyhow::anyhow!("Invalid salt encoding: {}", e))?;
    let nonce_bytes = BASE64
        .decode(&secret.nonce)
        .map_err(|e| anyhow::anyhow!("Invalid nonce encoding: {}", e))?;
    let ciphertext = BASE64
        .decode(&secret.ciphertext)
        .map_err(|e| anyhow::anyhow!("Invalid ciphertext encoding: {}", e))?;

    if nonce_bytes.len() != NONCE_LEN {
        return Err(anyhow::anyhow!("Invalid nonce length"));
    }

    let key = derive_key(session_token, fingerprint, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

    cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: ciphertext.as_slice(),
                aad: secret.algorithm.as_bytes(),
            },
        )
        .map_err(|e| anyhow::anyhow!("Decryption failure: {}", e))
}
