//! Keymaster - biometric gatekeeper for a per-user secret vault
//!
//! This library provides the pieces behind the `keymaster` binary: the
//! session cache that remembers a recent device-owner authentication, the
//! authenticator and vault collaborators, and the dispatcher that ties them
//! together for a single get/set/delete request.

pub mod auth;
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod session;

use thiserror::Error;

/// Exit status for a malformed command line.
pub const EXIT_USAGE: u8 = 2;

/// Main error type for Keymaster operations
#[derive(Error, Debug)]
pub enum KeymasterError {
    #[error("authentication unavailable: {0}")]
    AuthUnsupported(#[from] auth::Unsupported),

    #[error(transparent)]
    Auth(#[from] auth::AuthFailure),

    #[error(transparent)]
    Vault(#[from] backend::VaultError),

    #[error("config error: {0}")]
    Config(String),
}

impl KeymasterError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 1,
            Self::AuthUnsupported(_) => 3,
            Self::Auth(_) => 4,
            Self::Vault(_) => 5,
        }
    }
}

/// Result type alias for Keymaster operations
pub type Result<T> = std::result::Result<T, KeymasterError>;
