//! Device-owner authentication for Keymaster
//!
//! An [`Authenticator`] performs one interactive or biometric check of the
//! person at the keyboard. The check is asynchronous and resolves exactly
//! once. Any timeout is the platform mechanism's business, not ours.

mod command;

pub use command::CommandAuthenticator;

use async_trait::async_trait;
use thiserror::Error;

/// The host cannot perform device-owner authentication at all
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct Unsupported {
    pub reason: String,
}

impl Unsupported {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Why an authentication attempt did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("authentication denied: {0}")]
    Denied(String),

    #[error("authentication canceled")]
    Canceled,

    #[error("authentication system error: {0}")]
    SystemError(String),
}

/// A device-owner check
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Fail fast if this host has no usable authentication mechanism
    fn check_supported(&self) -> Result<(), Unsupported>;

    /// Ask the device owner to authenticate, showing `prompt`
    async fn authenticate(&self, prompt: &str) -> Result<(), AuthFailure>;
}
