//! Request dispatch: authorize once, then perform exactly one vault operation
//!
//! The flow per invocation is
//! session check -> (authenticate if needed -> record session) -> vault.
//! Nothing is retried. A vault operation runs only after the request was
//! authorized, and the session marker is only written after a fresh
//! successful authentication.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::auth::Authenticator;
use crate::backend::{Vault, VaultError};
use crate::session::{self, SessionStore};
use crate::KeymasterError;

/// Source of the current time in epoch seconds
pub type Clock = fn() -> i64;

/// Wall-clock time in epoch seconds
pub fn system_clock() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The user's parsed request
#[derive(Debug)]
pub enum Intent {
    Set { key: String, secret: SecretString },
    Get { key: String },
    Delete { key: String },
}

impl Intent {
    /// Key the request is about
    pub fn key(&self) -> &str {
        match self {
            Intent::Set { key, .. } | Intent::Get { key } | Intent::Delete { key } => key,
        }
    }

    /// Text shown to the device owner when authentication is required
    pub fn prompt(&self) -> String {
        let action = match self {
            Intent::Set { .. } => "store",
            Intent::Get { .. } => "read",
            Intent::Delete { .. } => "delete",
        };
        format!("keymaster: authenticate to {action} \"{}\"", self.key())
    }
}

/// How (or whether) the request was authorized
#[derive(Debug)]
pub enum AuthDecision {
    /// A cached session covered this request
    AlreadyAuthorized,
    /// The device owner authenticated during this invocation
    NewlyAuthorized,
    /// No authorization; carries the unsupported or failure reason
    Denied(KeymasterError),
}

impl AuthDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::AlreadyAuthorized | Self::NewlyAuthorized)
    }
}

/// Result of a successful vault operation
#[derive(Debug)]
pub enum Outcome {
    Stored { key: String },
    Retrieved { key: String, secret: SecretString },
    Deleted { key: String },
}

/// Orchestrates one authorized vault request
pub struct Dispatcher {
    store: Arc<dyn SessionStore>,
    authenticator: Arc<dyn Authenticator>,
    vault: Arc<dyn Vault>,
    window: Duration,
    clock: Clock,
}

impl Dispatcher {
    /// Create a dispatcher using the system clock
    pub fn new(
        store: Arc<dyn SessionStore>,
        authenticator: Arc<dyn Authenticator>,
        vault: Arc<dyn Vault>,
        window: Duration,
    ) -> Self {
        Self {
            store,
            authenticator,
            vault,
            window,
            clock: system_clock,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Authorize `intent` and perform it
    pub async fn run(&self, intent: Intent) -> Result<Outcome, KeymasterError> {
        match self.authorize(&intent).await {
            AuthDecision::Denied(err) => {
                tracing::debug!(key = intent.key(), error = %err, "request not authorized");
                Err(err)
            }
            decision => {
                tracing::debug!(key = intent.key(), decision = ?decision, "request authorized");
                Ok(self.perform(intent).await?)
            }
        }
    }

    /// Decide whether the request may proceed, authenticating if needed
    pub async fn authorize(&self, intent: &Intent) -> AuthDecision {
        let stored = self.store.read();
        let now = (self.clock)();

        if session::is_valid(stored, now, self.window) {
            tracing::info!(
                age_secs = stored.map(|ts| now - ts),
                "reusing recent authentication"
            );
            return AuthDecision::AlreadyAuthorized;
        }

        if let Err(unsupported) = self.authenticator.check_supported() {
            return AuthDecision::Denied(unsupported.into());
        }

        if let Err(failure) = self.authenticator.authenticate(&intent.prompt()).await {
            return AuthDecision::Denied(failure.into());
        }

        // non-fatal: the request is already authorized
        if let Err(e) = self.store.write((self.clock)()) {
            tracing::warn!(error = %e, "could not record session");
        }

        tracing::info!("authenticated");
        AuthDecision::NewlyAuthorized
    }

    /// Perform the vault operation for an authorized intent
    pub async fn perform(&self, intent: Intent) -> Result<Outcome, VaultError> {
        match intent {
            Intent::Set { key, secret } => {
                self.vault.store(&key, &secret).await?;
                Ok(Outcome::Stored { key })
            }
            Intent::Get { key } => {
                let secret = self.vault.retrieve(&key).await?;
                Ok(Outcome::Retrieved { key, secret })
            }
            Intent::Delete { key } => {
                self.vault.erase(&key).await?;
                Ok(Outcome::Deleted { key })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::mock::MockAuthenticator;
    use crate::auth::AuthFailure;
    use crate::backend::mock::MockVault;
    use crate::session::mock::MemorySessionStore;
    use crate::session::FileSessionStore;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    const NOW: i64 = 1_700_000_000;
    const WINDOW: Duration = Duration::from_secs(300);

    fn fixed_clock() -> i64 {
        NOW
    }

    struct Harness {
        store: Arc<MemorySessionStore>,
        auth: Arc<MockAuthenticator>,
        vault: Arc<MockVault>,
        dispatcher: Dispatcher,
    }

    fn harness(store: MemorySessionStore, auth: MockAuthenticator, vault: MockVault) -> Harness {
        let store = Arc::new(store);
        let auth = Arc::new(auth);
        let vault = Arc::new(vault);
        let dispatcher = Dispatcher::new(store.clone(), auth.clone(), vault.clone(), WINDOW)
            .with_clock(fixed_clock);
        Harness {
            store,
            auth,
            vault,
            dispatcher,
        }
    }

    fn set(key: &str, secret: &str) -> Intent {
        Intent::Set {
            key: key.to_string(),
            secret: SecretString::from(secret.to_string()),
        }
    }

    fn get(key: &str) -> Intent {
        Intent::Get { key: key.to_string() }
    }

    fn delete(key: &str) -> Intent {
        Intent::Delete { key: key.to_string() }
    }

    #[tokio::test]
    async fn test_no_session_authenticates_once_and_records() {
        let h = harness(
            MemorySessionStore::new(None),
            MockAuthenticator::succeeding(),
            MockVault::new(),
        );

        let outcome = h.dispatcher.run(set("foo", "bar123")).await.unwrap();

        assert!(matches!(outcome, Outcome::Stored { key } if key == "foo"));
        assert_eq!(h.auth.calls(), 1);
        assert_eq!(h.store.read(), Some(NOW));
        assert_eq!(h.vault.value("foo").as_deref(), Some("bar123"));
    }

    #[tokio::test]
    async fn test_valid_session_skips_authentication() {
        let h = harness(
            MemorySessionStore::new(Some(NOW - 10)),
            MockAuthenticator::succeeding(),
            MockVault::with_data(HashMap::from([("foo".to_string(), "bar".to_string())])),
        );

        let outcome = h.dispatcher.run(get("foo")).await.unwrap();

        match outcome {
            Outcome::Retrieved { key, secret } => {
                assert_eq!(key, "foo");
                assert_eq!(secret.expose_secret(), "bar");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.auth.calls(), 0);
        assert_eq!(h.store.writes(), 0);
        assert_eq!(h.vault.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_authenticates() {
        let h = harness(
            MemorySessionStore::new(Some(NOW - 301)),
            MockAuthenticator::succeeding(),
            MockVault::new(),
        );

        let decision = h.dispatcher.authorize(&get("foo")).await;
        assert!(matches!(decision, AuthDecision::NewlyAuthorized));
        assert_eq!(h.auth.calls(), 1);
        assert_eq!(h.auth.prompts(), vec!["keymaster: authenticate to read \"foo\""]);
    }

    #[tokio::test]
    async fn test_window_edge_is_still_valid() {
        let h = harness(
            MemorySessionStore::new(Some(NOW - 300)),
            MockAuthenticator::succeeding(),
            MockVault::new(),
        );

        let decision = h.dispatcher.authorize(&get("foo")).await;
        assert!(matches!(decision, AuthDecision::AlreadyAuthorized));
        assert!(decision.is_authorized());
        assert_eq!(h.auth.calls(), 0);
    }

    #[tokio::test]
    async fn test_second_call_reuses_fresh_session() {
        let h = harness(
            MemorySessionStore::new(None),
            MockAuthenticator::succeeding(),
            MockVault::new(),
        );

        h.dispatcher.run(set("k", "v")).await.unwrap();
        h.dispatcher.run(get("k")).await.unwrap();
        h.dispatcher.run(delete("k")).await.unwrap();

        assert_eq!(h.auth.calls(), 1);
        assert_eq!(h.store.writes(), 1);
        assert_eq!(h.vault.calls(), 3);
    }

    #[tokio::test]
    async fn test_session_write_failure_is_not_fatal() {
        let h = harness(
            MemorySessionStore::failing(),
            MockAuthenticator::succeeding(),
            MockVault::new(),
        );

        let outcome = h.dispatcher.run(set("k", "v")).await.unwrap();

        assert!(matches!(outcome, Outcome::Stored { .. }));
        assert_eq!(h.store.writes(), 1);
        assert_eq!(h.vault.value("k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_denied_blocks_vault() {
        let h = harness(
            MemorySessionStore::new(None),
            MockAuthenticator::failing(AuthFailure::Denied("no match".into())),
            MockVault::new(),
        );

        let err = h.dispatcher.run(set("k", "v")).await.unwrap_err();

        assert!(matches!(err, KeymasterError::Auth(AuthFailure::Denied(_))));
        assert_ne!(err.exit_code(), 0);
        assert_eq!(h.vault.calls(), 0);
        assert_eq!(h.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_canceled_blocks_vault() {
        let h = harness(
            MemorySessionStore::new(Some(NOW - 1_000)),
            MockAuthenticator::failing(AuthFailure::Canceled),
            MockVault::new(),
        );

        let err = h.dispatcher.run(get("k")).await.unwrap_err();

        assert!(matches!(err, KeymasterError::Auth(AuthFailure::Canceled)));
        assert_eq!(h.vault.calls(), 0);
        assert_eq!(h.store.read(), Some(NOW - 1_000));
    }

    #[tokio::test]
    async fn test_unsupported_skips_authentication_and_vault() {
        let h = harness(
            MemorySessionStore::new(None),
            MockAuthenticator::unsupported("no fingerprint reader"),
            MockVault::new(),
        );

        let err = h.dispatcher.run(get("k")).await.unwrap_err();

        assert!(matches!(err, KeymasterError::AuthUnsupported(_)));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(h.auth.calls(), 0);
        assert_eq!(h.vault.calls(), 0);
    }

    #[tokio::test]
    async fn test_vault_errors_propagate() {
        let h = harness(
            MemorySessionStore::new(Some(NOW)),
            MockAuthenticator::succeeding(),
            MockVault::new(),
        );

        let err = h.dispatcher.run(get("unknown")).await.unwrap_err();
        assert!(matches!(err, KeymasterError::Vault(VaultError::NotFound { .. })));
        assert_eq!(err.exit_code(), 5);

        h.dispatcher.run(set("k", "v")).await.unwrap();
        let err = h.dispatcher.run(set("k", "v2")).await.unwrap_err();
        assert!(matches!(err, KeymasterError::Vault(VaultError::AlreadyExists { .. })));

        h.dispatcher.run(delete("k")).await.unwrap();
        let err = h.dispatcher.run(get("k")).await.unwrap_err();
        assert!(matches!(err, KeymasterError::Vault(VaultError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_scenario_with_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keymaster.session");
        let auth = Arc::new(MockAuthenticator::succeeding());
        let vault = Arc::new(MockVault::new());
        let dispatcher = Dispatcher::new(
            Arc::new(FileSessionStore::new(&path)),
            auth.clone(),
            vault.clone(),
            WINDOW,
        )
        .with_clock(fixed_clock);

        dispatcher.run(set("foo", "bar123")).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), NOW.to_string());
        assert_eq!(vault.value("foo").as_deref(), Some("bar123"));
        assert_eq!(auth.calls(), 1);
    }

    #[test]
    fn test_intent_debug_hides_secret() {
        let intent = set("k", "super-secret");
        assert!(!format!("{intent:?}").contains("super-secret"));
        assert_eq!(intent.key(), "k");
    }
}
