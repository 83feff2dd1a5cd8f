//! Vault trait and implementations for secret storage
//!
//! The default vault is the OS credential store via `keyring`; `pass`
//! (password-store) is available as an alternative. Both speak the same
//! typed store/retrieve/erase contract, and an in-memory mock is provided
//! for testing.

mod keychain;
mod pass;

pub use keychain::KeychainBackend;
pub use pass::PassBackend;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

/// Errors that can occur in vault operations
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("no secret stored for {key}")]
    NotFound { key: String },

    #[error("a secret is already stored for {key}")]
    AlreadyExists { key: String },

    #[error("vault error: {0}")]
    Backend(String),
}

/// Secure per-key secret storage
#[async_trait]
pub trait Vault: Send + Sync {
    /// Store a new secret; never overwrites an existing entry
    async fn store(&self, key: &str, secret: &SecretString) -> Result<(), VaultError>;

    /// Retrieve a secret by key
    async fn retrieve(&self, key: &str) -> Result<SecretString, VaultError>;

    /// Remove a secret
    async fn erase(&self, key: &str) -> Result<(), VaultError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory mock vault for testing
    pub struct MockVault {
        store: Mutex<HashMap<String, String>>,
        calls: AtomicUsize,
    }

    impl MockVault {
        pub fn new() -> Self {
            Self {
                store: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_data(data: HashMap<String, String>) -> Self {
            Self {
                store: Mutex::new(data),
                calls: AtomicUsize::new(0),
            }
        }

        /// Number of vault operations performed
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn value(&self, key: &str) -> Option<String> {
            self.store.lock().unwrap().get(key).cloned()
        }
    }

    #[async_trait]
    impl Vault for MockVault {
        async fn store(&self, key: &str, secret: &SecretString) -> Result<(), VaultError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            if store.contains_key(key) {
                return Err(VaultError::AlreadyExists { key: key.to_string() });
            }
            store.insert(key.to_string(), secret.expose_secret().to_string());
            Ok(())
        }

        async fn retrieve(&self, key: &str) -> Result<SecretString, VaultError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let store = self.store.lock().unwrap();
            store
                .get(key)
                .map(|v| SecretString::from(v.clone()))
                .ok_or_else(|| VaultError::NotFound { key: key.to_string() })
        }

        async fn erase(&self, key: &str) -> Result<(), VaultError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            store
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| VaultError::NotFound { key: key.to_string() })
        }
    }
}
