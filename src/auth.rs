//! Access gate.
//!
//! Credentials arrive as `Authorization: Basic base64(user:pass)`. Stored
//! secrets are argon2id PHC strings. Every failure, whether the header is
//! malformed, the user is unknown, the lookup errored, or the password is
//! wrong, comes back as the same [`Denied`]. Unknown users are verified
//! against a dummy hash so both paths do the same work.

use std::sync::{Arc, OnceLock};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::error::{Consistency, PipelineError, Result};
use crate::models::Principal;
use crate::store::{MetadataStore, StoreError};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid credentials")]
pub struct Denied;

pub struct AccessGate {
    store: Arc<dyn MetadataStore>,
    hasher: Argon2<'static>,
    dummy_hash: OnceLock<String>,
}

impl AccessGate {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self::with_params(store, Params::default())
    }

    pub fn with_params(store: Arc<dyn MetadataStore>, params: Params) -> Self {
        Self {
            store,
            hasher: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy_hash: OnceLock::new(),
        }
    }

    /// Hash checked when the username is unknown. Computed on first use
    /// with the same parameters as real hashes.
    fn dummy_hash(&self) -> String {
        self.dummy_hash
            .get_or_init(|| {
                hash_password(&self.hasher, "folio-dummy-credential").unwrap_or_default()
            })
            .clone()
    }

    /// Resolve an `Authorization` header value to a principal.
    pub async fn authenticate(&self, header: Option<&str>) -> std::result::Result<Principal, Denied> {
        let (username, password) = header.and_then(decode_basic).ok_or(Denied)?;
        self.verify(&username, &password).await
    }

    /// Same contract as [`authenticate`](Self::authenticate); logs the outcome.
    pub async fn login(&self, header: Option<&str>) -> std::result::Result<Principal, Denied> {
        let principal = self.authenticate(header).await?;
        tracing::info!(user = %principal.username, "login");
        Ok(principal)
    }

    pub async fn verify(&self, username: &str, password: &str) -> std::result::Result<Principal, Denied> {
        let user = match self.store.find_user(username).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "credential lookup failed");
                None
            }
        };

        let hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash());
        let password = password.to_string();
        let matched = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .unwrap_or(false);

        match user {
            Some(user) if matched => Ok(Principal::from(&user)),
            _ => {
                tracing::debug!("credentials rejected");
                Err(Denied)
            }
        }
    }

    /// Create a user. Fails with `Conflict` when the name is taken.
    pub async fn register(&self, username: &str, password: &str) -> Result<Principal> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "username and password are required".to_string(),
            ));
        }
        // Basic credentials split on the first ':'.
        if username.contains(':') {
            return Err(PipelineError::InvalidArgument(
                "username may not contain ':'".to_string(),
            ));
        }

        let taken = self
            .store
            .find_user(username)
            .await
            .map_err(PipelineError::MetadataReadFailed)?;
        if taken.is_some() {
            return Err(taken_error(username));
        }

        let hasher = self.hasher.clone();
        let secret = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_password(&hasher, &secret))
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::other(e.to_string())))?
            .map_err(|e| PipelineError::InvalidArgument(format!("password rejected: {}", e)))?;

        let user = self
            .store
            .insert_user(username, &hash)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => taken_error(username),
                source => PipelineError::MetadataWriteFailed {
                    consistency: Consistency::Clean,
                    source,
                },
            })?;

        tracing::info!(user = %user.username, id = user.id, "user registered");
        Ok(Principal::from(&user))
    }
}

fn taken_error(username: &str) -> PipelineError {
    PipelineError::Conflict(format!("username '{}' is already taken", username))
}

fn hash_password(hasher: &Argon2<'_>, password: &str) -> argon2::password_hash::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(hasher.hash_password(password.as_bytes(), &salt)?.to_string())
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Split a `Basic` header value into `(username, password)`.
pub fn decode_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
