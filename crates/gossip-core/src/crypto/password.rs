//! Argon2id password hashing.
//!
//! The salt is fixed across every deployment: client and hub must derive
//! identical hashes without any prior exchange. The cost of that choice is
//! that hashes are portable between deployments; operators should treat
//! the hash itself as a secret.

use argon2::{Algorithm, Argon2, Params, Version};

use super::CryptoError;

/// Deployment-wide salt. Changing it breaks auth against older builds.
const SALT: &[u8] = b"Th1S1$nOt4sEcuR3sALt";

/// Memory cost in KiB (64 MiB).
const MEMORY_KIB: u32 = 64 * 1024;
const ITERATIONS: u32 = 1;
const PARALLELISM: u32 = 4;
const OUTPUT_LEN: usize = 32;

/// Hash a password with Argon2id over the fixed salt; returns lowercase
/// hex of the 32-byte digest.
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let params = Params::new(MEMORY_KIB, ITERATIONS, PARALLELISM, Some(OUTPUT_LEN))
        .map_err(|e| CryptoError::Hash(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut digest = [0u8; OUTPUT_LEN];
    argon2
        .hash_password_into(password.as_bytes(), SALT, &mut digest)
        .map_err(|e| CryptoError::Hash(e.to_string()))?;

    Ok(hex::encode(digest))
}
