//! Credential checks performed before a connection joins any room.
//!
//! The dispatcher only talks to a [`CredentialStore`]; where the accounts
//! actually live is up to the implementation. Checks run on the blocking
//! pool, so a store is free to do slow I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;
use sha1::{Digest, Sha1};
use shared::auth::{AuthMode, AuthRequest};

use crate::error::CredentialError;

pub trait CredentialStore: Send + Sync {
    fn user_exists(&self, name: &str) -> Result<bool, CredentialError>;

    fn verify_password(&self, name: &str, password: &str) -> Result<bool, CredentialError>;

    /// Returns false if the name is already taken.
    fn register_user(&self, name: &str, password: &str) -> Result<bool, CredentialError>;
}

struct StoredCredential {
    salt: [u8; 16],
    digest: Vec<u8>,
}

fn digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

/// Process-local accounts stored as salted SHA-1 digests.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: Mutex<HashMap<String, StoredCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredCredential>>, CredentialError> {
        self.users
            .lock()
            .map_err(|_| CredentialError("credential table lock poisoned".to_string()))
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn user_exists(&self, name: &str) -> Result<bool, CredentialError> {
        Ok(self.users()?.contains_key(name))
    }

    fn verify_password(&self, name: &str, password: &str) -> Result<bool, CredentialError> {
        Ok(self
            .users()?
            .get(name)
            .is_some_and(|stored| digest(&stored.salt, password) == stored.digest))
    }

    fn register_user(&self, name: &str, password: &str) -> Result<bool, CredentialError> {
        let mut users = self.users()?;
        if users.contains_key(name) {
            return Ok(false);
        }
        let salt: [u8; 16] = rand::random();
        let digest = digest(&salt, password);
        users.insert(name.to_string(), StoredCredential { salt, digest });
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthVerdict {
    Accepted,
    Rejected(String),
}

/// Runs a login or registration against `store`.
pub fn authenticate(store: &dyn CredentialStore, request: &AuthRequest) -> AuthVerdict {
    match check(store, request) {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!("Credential check for `{}` failed: {}", request.name, e);
            AuthVerdict::Rejected("Login service unavailable, try again later".to_string())
        }
    }
}

fn check(store: &dyn CredentialStore, request: &AuthRequest) -> Result<AuthVerdict, CredentialError> {
    let rejected = |reason: &str| Ok(AuthVerdict::Rejected(reason.to_string()));

    match request.mode {
        AuthMode::Register => {
            if store.user_exists(&request.name)? {
                return rejected("Username already taken");
            }
            if !store.register_user(&request.name, &request.password)? {
                return rejected("Username already taken");
            }
        }
        AuthMode::Login => {
            if !store.user_exists(&request.name)? {
                return rejected("User does not exist");
            }
            if !store.verify_password(&request.name, &request.password)? {
                return rejected("Wrong password");
            }
        }
    }
    Ok(AuthVerdict::Accepted)
}
