//! Cryptographic façade: OpenPGP identity operations and password hashing.
//!
//! Everything the protocol encrypts goes through OpenPGP: armored public
//! keys are the unit of key exchange, ciphertexts are raw (unarmored)
//! message bytes, and multi-recipient chat uses the shared session-key
//! mechanism so one ciphertext decrypts for every addressed key.

mod identity;
mod password;

pub use identity::{encrypt_to, encrypt_to_many, Identity};
pub use password::hash_password;

/// Failures surfaced by the crypto façade.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGen(String),
    #[error("unreadable public key: {0}")]
    BadKey(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}
