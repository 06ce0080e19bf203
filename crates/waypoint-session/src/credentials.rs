//! Password hashing and verification.
//!
//! Stored secrets are Argon2id hashes in PHC string format
//! (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`). The PHC string carries
//! its own parameters, so a hash produced under one cost setting still
//! verifies after the configured cost changes.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::Rng;
use serde::Deserialize;

use crate::CredentialError;

/// Argon2 cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl CredentialConfig {
    /// The smallest parameters Argon2 accepts. Hashing takes microseconds,
    /// which is what test suites and local seeding want. Never use this
    /// for real accounts.
    pub fn low_cost() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Hashes and verifies user secrets.
///
/// Cheap to clone; one instance is shared by the presence engine and the
/// registration endpoint.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
    /// A real hash of a throwaway secret. Verifying against it when the
    /// e-mail is unknown makes "no such user" cost the same as "wrong
    /// password".
    decoy: String,
}

impl SecretHasher {
    /// # Errors
    /// Returns [`CredentialError::InvalidParams`] if Argon2 rejects the
    /// cost parameters.
    pub fn new(config: CredentialConfig) -> Result<Self, CredentialError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| CredentialError::InvalidParams(e.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let decoy = hash_with(&argon2, "waypoint-decoy-secret")?;

        Ok(Self { argon2, decoy })
    }

    /// Produces a PHC string for `secret` under a fresh random salt.
    ///
    /// # Errors
    /// Returns [`CredentialError::Hash`] if Argon2 fails.
    pub fn hash(&self, secret: &str) -> Result<String, CredentialError> {
        hash_with(&self.argon2, secret)
    }

    /// Returns `true` iff `candidate` hashes to `stored`.
    ///
    /// A `stored` value that isn't a parseable PHC string is a mismatch.
    /// The comparison itself is constant-time inside `argon2`.
    pub fn verify(&self, stored: &str, candidate: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored) else {
            return false;
        };
        self.argon2
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok()
    }

    /// Burns one verification against the decoy hash and returns `false`.
    pub fn verify_decoy(&self, candidate: &str) -> bool {
        let _ = self.verify(&self.decoy, candidate);
        false
    }

    /// [`hash`](Self::hash) on Tokio's blocking pool.
    ///
    /// Argon2 at production cost holds a core for tens of milliseconds;
    /// async callers use this so other tasks on the worker keep running.
    ///
    /// # Errors
    /// Returns [`CredentialError::Hash`] if Argon2 fails or the blocking
    /// task is cancelled.
    pub async fn spawn_hash(&self, secret: String) -> Result<String, CredentialError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| CredentialError::Hash(format!("hashing task failed: {e}")))?
    }

    /// [`verify`](Self::verify) on Tokio's blocking pool. A cancelled task
    /// counts as a mismatch.
    pub async fn spawn_verify(&self, stored: String, candidate: String) -> bool {
        let hasher = self.clone();
        match tokio::task::spawn_blocking(move || hasher.verify(&stored, &candidate)).await {
            Ok(matched) => matched,
            Err(e) => {
                tracing::error!(error = %e, "verification task failed");
                false
            }
        }
    }

    /// [`verify_decoy`](Self::verify_decoy) on Tokio's blocking pool.
    pub async fn spawn_verify_decoy(&self, candidate: String) -> bool {
        let hasher = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || hasher.verify_decoy(&candidate)).await {
            tracing::debug!(error = %e, "decoy verification task failed");
        }
        false
    }
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher").finish_non_exhaustive()
    }
}

fn hash_with(argon2: &Argon2<'_>, secret: &str) -> Result<String, CredentialError> {
    let salt_bytes: [u8; 16] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| CredentialError::Hash(e.to_string()))?;

    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CredentialError::Hash(e.to_string()))
}
