//! OS credential store backend (macOS Keychain, Windows Credential Manager,
//! Secret Service on Linux) via the `keyring` crate.
//!
//! Every secret lives under one service name with the key as the account.
//! `keyring` calls block, so they run on the blocking pool.

use async_trait::async_trait;
use keyring::Entry;
use secrecy::{ExposeSecret, SecretString};

use super::{Vault, VaultError};

/// Keyring-backed vault
#[derive(Debug, Clone)]
pub struct KeychainBackend {
    service: String,
}

impl KeychainBackend {
    /// Create a backend storing entries under the given service name
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(service: &str, key: &str) -> Result<Entry, VaultError> {
        Entry::new(service, key).map_err(|e| map_error(key, e))
    }

    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T, VaultError>
    where
        T: Send + 'static,
        F: FnOnce(String, String) -> Result<T, VaultError> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || op(service, key))
            .await
            .map_err(|e| VaultError::Backend(format!("keyring task failed: {e}")))?
    }
}

/// Translate a keyring error into the most specific vault error
fn map_error(key: &str, err: keyring::Error) -> VaultError {
    match err {
        keyring::Error::NoEntry => VaultError::NotFound {
            key: key.to_string(),
        },
        keyring::Error::NoStorageAccess(inner) => {
            VaultError::Backend(format!("credential store is not accessible: {inner}"))
        }
        keyring::Error::PlatformFailure(inner) => {
            VaultError::Backend(format!("credential store failure: {inner}"))
        }
        keyring::Error::BadEncoding(_) => {
            VaultError::Backend(format!("stored secret for {key} is not valid UTF-8"))
        }
        other => VaultError::Backend(other.to_string()),
    }
}

#[async_trait]
impl Vault for KeychainBackend {
    async fn store(&self, key: &str, secret: &SecretString) -> Result<(), VaultError> {
        let secret = SecretString::from(secret.expose_secret().to_string());

        self.blocking(key, move |service, key| {
            let entry = Self::entry(&service, &key)?;
            match entry.get_password() {
                Ok(_) => return Err(VaultError::AlreadyExists { key }),
                Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(map_error(&key, e)),
            }

            tracing::debug!(service = %service, key = %key, "storing secret in keyring");
            entry
                .set_password(secret.expose_secret())
                .map_err(|e| map_error(&key, e))
        })
        .await
    }

    async fn retrieve(&self, key: &str) -> Result<SecretString, VaultError> {
        self.blocking(key, |service, key| {
            tracing::debug!(service = %service, key = %key, "reading secret from keyring");
            Self::entry(&service, &key)?
                .get_password()
                .map(SecretString::from)
                .map_err(|e| map_error(&key, e))
        })
        .await
    }

    async fn erase(&self, key: &str) -> Result<(), VaultError> {
        self.blocking(key, |service, key| {
            tracing::debug!(service = %service, key = %key, "deleting secret from keyring");
            Self::entry(&service, &key)?
                .delete_credential()
                .map_err(|e| map_error(&key, e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_entry_maps_to_not_found() {
        let err = map_error("api/token", keyring::Error::NoEntry);
        assert!(matches!(err, VaultError::NotFound { key } if key == "api/token"));
    }

    #[test]
    fn test_backend_errors_keep_detail() {
        let err = map_error(
            "k",
            keyring::Error::Invalid("service".into(), "empty".into()),
        );
        match err {
            VaultError::Backend(msg) => assert!(msg.contains("service")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_store_survives_reboot() {
        use keyring::credential::{CredentialBuilderApi, CredentialPersistence};

        let builder = keyring::secret_service::default_credential_builder();
        assert!(matches!(
            builder.persistence(),
            CredentialPersistence::UntilDelete
        ));
    }

    // Requires a working OS credential store; run with: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_roundtrip_against_os_store() {
        let backend = KeychainBackend::new("keymaster-test");
        let key = format!("test-{}", std::process::id());

        backend
            .store(&key, &SecretString::from("hunter2".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            backend
                .store(&key, &SecretString::from("again".to_string()))
                .await,
            Err(VaultError::AlreadyExists { .. })
        ));
        assert_eq!(backend.retrieve(&key).await.unwrap().expose_secret(), "hunter2");
        backend.erase(&key).await.unwrap();
        assert!(matches!(
            backend.retrieve(&key).await,
            Err(VaultError::NotFound { .. })
        ));
    }
}
