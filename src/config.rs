//! Configuration loading for Keymaster
//!
//! Configuration is loaded from an optional TOML file. Every field has a
//! default, so the tool works without any file at all.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::KeymasterError;

/// Built-in session reuse window in seconds.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session cache configuration
    pub session: SessionConfig,
    /// Vault backend configuration
    pub vault: VaultConfig,
    /// Device-owner authenticator configuration
    pub authenticator: AuthenticatorConfig,
}

/// Session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reuse window in seconds (overridden by `KEYMASTER_TTL`)
    pub ttl_secs: u64,
    /// Location of the session marker file
    pub path: PathBuf,
}

/// Which vault backend to talk to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OS credential store (Keychain, Credential Manager, Secret Service)
    Keyring,
    /// password-store CLI
    Pass,
}

/// Vault backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Backend selection
    pub backend: BackendKind,
    /// Keyring service name that namespaces all keys
    pub service: String,
    /// Pass backend settings
    pub pass: PassConfig,
}

/// Pass backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    /// Path to pass binary
    pub binary: PathBuf,
    /// Path to password store
    pub store_path: PathBuf,
    /// Timeout for pass commands in seconds
    pub timeout_secs: u64,
}

/// Authenticator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticatorConfig {
    /// Command performing the device-owner check
    pub command: PathBuf,
    /// Arguments; `{prompt}` is replaced with the prompt text
    pub args: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            path: default_session_path(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Keyring,
            service: "keymaster".to_string(),
            pass: PassConfig::default(),
        }
    }
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pass"),
            store_path: dirs::home_dir()
                .map(|h| h.join(".password-store"))
                .unwrap_or_else(|| PathBuf::from(".password-store")),
            timeout_secs: 10,
        }
    }
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("fprintd-verify"),
            args: Vec::new(),
        }
    }
}

/// Per-user temporary location shared by every invocation
fn default_session_path() -> PathBuf {
    // XDG_RUNTIME_DIR is already private to the user
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("keymaster.session"),
        _ => std::env::temp_dir().join(format!("keymaster-{}.session", crate::session::current_uid())),
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self, KeymasterError> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(|| {
            dirs::config_dir()
                .map(|d| d.join("keymaster").join("config.toml"))
                .unwrap_or_else(|| PathBuf::from("keymaster.toml"))
        });

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .map_err(|e| KeymasterError::Config(format!("failed to read config: {e}")))?;
            let config: Config = toml::from_str(&contents)
                .map_err(|e| KeymasterError::Config(format!("failed to parse config: {e}")))?;
            Ok(config)
        } else if path.is_some() {
            Err(KeymasterError::Config(format!(
                "config file not found: {}",
                config_path.display()
            )))
        } else {
            tracing::debug!("no config file found at {}, using defaults", config_path.display());
            Ok(Config::default())
        }
    }

    /// Configured reuse window, before any environment override
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_secs)
    }
}
