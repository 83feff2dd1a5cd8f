//! Pass (password-store) backend implementation
//!
//! This wraps the `pass` command-line tool, handling subprocess execution,
//! output parsing, and error handling.
//!
//! tokio::process::Command executes the binary directly without a shell, so
//! keys are never interpolated into a command line.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Vault, VaultError};
use crate::config::PassConfig;

/// Pass backend that wraps the password-store CLI
pub struct PassBackend {
    /// Path to pass binary
    binary: PathBuf,
    /// Path to password store
    store_path: PathBuf,
    /// Command timeout
    timeout: Duration,
}

impl PassBackend {
    /// Create a new pass backend with the given configuration
    pub fn new(config: &PassConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            store_path: config.store_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn command(&self, args: &[&str], stdin: Stdio) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env("PASSWORD_STORE_DIR", &self.store_path)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run pass with `args` for `key`, optionally feeding `input` on stdin,
    /// and return stdout.
    async fn run_pass(
        &self,
        key: &str,
        args: &[&str],
        input: Option<&str>,
    ) -> Result<String, VaultError> {
        let stdin = if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        tracing::debug!(
            binary = %self.binary.display(),
            args = ?args,
            "executing pass command"
        );

        let mut child = self
            .command(args, stdin)
            .spawn()
            .map_err(|e| VaultError::Backend(format!("failed to run {}: {e}", self.binary.display())))?;

        if let (Some(value), Some(mut pipe)) = (input, child.stdin.take()) {
            pipe.write_all(value.as_bytes())
                .await
                .map_err(|e| VaultError::Backend(format!("failed to write to pass: {e}")))?;
            // closing stdin signals EOF
            drop(pipe);
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(VaultError::Backend(format!("pass failed: {e}"))),
            Err(_) => {
                return Err(VaultError::Backend(format!(
                    "pass timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            // pass outputs a trailing newline, strip it
            return Ok(stdout.trim_end_matches('\n').to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();

        if stderr.contains("is not in the password store") {
            Err(VaultError::NotFound {
                key: key.to_string(),
            })
        } else if stderr.is_empty() {
            Err(VaultError::Backend(format!(
                "pass {} failed (exit {})",
                args.first().unwrap_or(&""),
                output.status.code().unwrap_or(-1)
            )))
        } else {
            Err(VaultError::Backend(format!(
                "pass {} failed: {stderr}",
                args.first().unwrap_or(&"")
            )))
        }
    }
}

#[async_trait]
impl Vault for PassBackend {
    async fn store(&self, key: &str, secret: &SecretString) -> Result<(), VaultError> {
        match self.run_pass(key, &["show", key], None).await {
            Ok(_) => return Err(VaultError::AlreadyExists { key: key.to_string() }),
            Err(VaultError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        tracing::debug!(key = key, "inserting secret via pass");
        self.run_pass(
            key,
            &["insert", "--multiline", key],
            Some(secret.expose_secret()),
        )
        .await?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<SecretString, VaultError> {
        self.run_pass(key, &["show", key], None)
            .await
            .map(SecretString::from)
    }

    async fn erase(&self, key: &str) -> Result<(), VaultError> {
        self.run_pass(key, &["rm", "--force", key], None).await?;
        Ok(())
    }
}
