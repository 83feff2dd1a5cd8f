//! Authenticator backed by an external verification command
//!
//! The default command is `fprintd-verify`, which scans a finger against the
//! current user's enrolled prints. Any program following the same
//! convention works: exit 0 means the owner was verified.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{AuthFailure, Authenticator, Unsupported};
use crate::config::AuthenticatorConfig;

/// Placeholder in configured arguments replaced by the prompt text
const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Runs a verification command and maps its exit status
pub struct CommandAuthenticator {
    command: PathBuf,
    args: Vec<String>,
    /// PATH used to locate bare command names
    search_path: Option<OsString>,
}

impl CommandAuthenticator {
    /// Create an authenticator from configuration
    pub fn new(config: &AuthenticatorConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Locate the command on disk
    fn resolve(&self) -> Option<PathBuf> {
        if self.command.components().count() > 1 {
            return self.command.is_file().then(|| self.command.clone());
        }

        let search_path = self.search_path.as_ref()?;
        std::env::split_paths(search_path)
            .map(|dir| dir.join(&self.command))
            .find(|candidate| is_executable(candidate))
    }

    fn args_for(&self, prompt: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(PROMPT_PLACEHOLDER, prompt))
            .collect()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Last non-empty line of the command's error output
fn last_line(stderr: &str) -> Option<&str> {
    stderr.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

#[async_trait]
impl Authenticator for CommandAuthenticator {
    fn check_supported(&self) -> Result<(), Unsupported> {
        match self.resolve() {
            Some(path) => {
                tracing::debug!(command = %path.display(), "authenticator available");
                Ok(())
            }
            None => Err(Unsupported::new(format!(
                "authentication command {} not found",
                self.command.display()
            ))),
        }
    }

    async fn authenticate(&self, prompt: &str) -> Result<(), AuthFailure> {
        eprintln!("{prompt}");

        let args = self.args_for(prompt);
        tracing::debug!(command = %self.command.display(), args = ?args, "starting authentication");

        // The command's own instructions go to our stderr; stdout is
        // reserved for results.
        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::from(std::io::stderr()))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AuthFailure::SystemError(format!("failed to start {}: {e}", self.command.display()))
            })?;

        let mut stderr_pipe = child.stderr.take();
        let collect_stderr = async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                // a broken pipe only costs us the failure detail
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        };

        // Single suspension point: resolves once, on exit or on Ctrl-C.
        let finished = tokio::select! {
            (status, stderr) = async { tokio::join!(child.wait(), collect_stderr) } => {
                Some((status, stderr))
            }
            Ok(()) = tokio::signal::ctrl_c() => None,
        };

        let Some((status, stderr)) = finished else {
            tracing::debug!("authentication interrupted");
            let _ = child.kill().await;
            return Err(AuthFailure::Canceled);
        };

        let status = status.map_err(|e| {
            AuthFailure::SystemError(format!("failed to wait for {}: {e}", self.command.display()))
        })?;

        if status.success() {
            return Ok(());
        }

        match status.code() {
            Some(code) => {
                let reason = last_line(&stderr)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!("{} exited with status {code}", self.command.display())
                    });
                Err(AuthFailure::Denied(reason))
            }
            // terminated by a signal
            None => Err(AuthFailure::Canceled),
        }
    }
}
