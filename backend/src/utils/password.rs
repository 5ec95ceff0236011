//! Password hashing and verification.
//!
//! Stored hashes are self-describing: the scheme that produced a hash is
//! identified by its `$`-prefixed tag, so hashes created under an earlier
//! default scheme keep verifying after the default changes. New hashes are
//! always produced by the single configured default scheme.

use std::borrow::Cow;

use argon2::Argon2;
use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString, rand_core::OsRng,
};
use sha2::{Digest, Sha256};

use crate::errors::{ServiceError, ServiceResult};

/// bcrypt ignores everything past this many input bytes.
const BCRYPT_MAX_PASSWORD_BYTES: usize = 72;

/// Hashing schemes accepted for stored password hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// `$2a$`/`$2b$`/`$2y$` modular-crypt hashes. Input limited to 72 bytes.
    Bcrypt,
    /// `$argon2*$` PHC-format hashes.
    Argon2,
}

impl HashScheme {
    /// Identifies the scheme that produced a stored hash from its tag.
    pub fn identify(stored: &str) -> Option<Self> {
        if stored.starts_with("$argon2") {
            Some(HashScheme::Argon2)
        } else if stored.starts_with("$2a$")
            || stored.starts_with("$2b$")
            || stored.starts_with("$2y$")
        {
            Some(HashScheme::Bcrypt)
        } else {
            None
        }
    }
}

/// Hashes new passwords under one default scheme and verifies stored hashes
/// under any accepted scheme.
pub struct PasswordHasher {
    scheme: HashScheme,
    bcrypt_cost: u32,
}

impl PasswordHasher {
    /// Creates a hasher with the default scheme for new hashes.
    pub fn new() -> Self {
        PasswordHasher {
            scheme: HashScheme::Bcrypt,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Uses `scheme` for newly created hashes.
    pub fn with_scheme(scheme: HashScheme) -> Self {
        PasswordHasher {
            scheme,
            ..Self::new()
        }
    }

    /// Overrides the bcrypt work factor.
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Hashes a password under the default scheme.
    ///
    /// # Errors
    /// Returns `ServiceError::Configuration` if the scheme cannot produce a
    /// hash; a well-formed password never fails.
    pub fn hash(&self, password: &str) -> ServiceResult<String> {
        match self.scheme {
            HashScheme::Bcrypt => bcrypt::hash(bcrypt_input(password).as_ref(), self.bcrypt_cost)
                .map_err(|e| {
                    ServiceError::configuration(format!("Password hashing failed: {}", e))
                }),
            HashScheme::Argon2 => {
                let salt = SaltString::generate(&mut OsRng);
                Argon2::default()
                    .hash_password(password.as_bytes(), &salt)
                    .map(|hash| hash.to_string())
                    .map_err(|e| {
                        ServiceError::configuration(format!("Password hashing failed: {}", e))
                    })
            }
        }
    }

    /// Verifies a password against a stored hash, dispatching on the hash's
    /// embedded scheme tag. A mismatch is a normal `false` result, and a
    /// stored hash in an unrecognized format is treated as a mismatch.
    pub fn verify(&self, password: &str, stored: &str) -> ServiceResult<bool> {
        match HashScheme::identify(stored) {
            Some(HashScheme::Bcrypt) => {
                match bcrypt::verify(bcrypt_input(password).as_ref(), stored) {
                    Ok(matches) => Ok(matches),
                    Err(_) => Ok(false),
                }
            }
            Some(HashScheme::Argon2) => {
                let parsed = match PasswordHash::new(stored) {
                    Ok(parsed) => parsed,
                    Err(_) => return Ok(false),
                };
                Ok(Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok())
            }
            None => Ok(false),
        }
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds over-length passwords through SHA-256 so bcrypt never sees more than
/// 72 bytes. The digest is hex-encoded and used in place of the raw password
/// on both the hash and verify paths, so the transform is deterministic and
/// nothing is silently truncated.
fn bcrypt_input(password: &str) -> Cow<'_, str> {
    if password.len() > BCRYPT_MAX_PASSWORD_BYTES {
        Cow::Owned(hex::encode(Sha256::digest(password.as_bytes())))
    } else {
        Cow::Borrowed(password)
    }
}
