//! Session cache: the timestamp of the last successful authentication
//!
//! The whole session is one decimal epoch-seconds value in a plain text
//! file. Any problem reading it means "no session". Writes replace the file
//! contents wholesale; there is no locking, so two invocations racing on the
//! same file may interleave.

pub mod policy;

pub use policy::{is_valid, resolve_window};

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur persisting the session marker
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Narrow access to the persisted session timestamp
pub trait SessionStore: Send + Sync {
    /// Last recorded authentication time, if any usable value exists
    fn read(&self) -> Option<i64>;

    /// Replace the recorded authentication time
    fn write(&self, now: i64) -> Result<(), SessionError>;
}

/// Session marker kept in a per-user file
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Create a store backed by the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the marker file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_for_write(&self) -> std::io::Result<std::fs::File> {
        let mut options = std::fs::OpenOptions::new();
        // truncated only once the owner check passes
        options.write(true).create(true).truncate(false);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600).custom_flags(libc::O_NOFOLLOW);
        }

        let file = options.open(&self.path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            check_owner(&file)?;
            // mode only applies on creation; tighten a pre-existing file too
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        file.set_len(0)?;
        Ok(file)
    }

    fn open_for_read(&self) -> std::io::Result<std::fs::File> {
        let mut options = std::fs::OpenOptions::new();
        options.read(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NOFOLLOW);
        }

        let file = options.open(&self.path)?;

        #[cfg(unix)]
        check_owner(&file)?;

        Ok(file)
    }
}

/// Refuse a marker planted by another user
#[cfg(unix)]
fn check_owner(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::MetadataExt;

    let owner = file.metadata()?.uid();
    if owner == current_uid() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("session marker is owned by uid {owner}"),
        ))
    }
}

#[cfg(unix)]
pub(crate) fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
pub(crate) fn current_uid() -> u32 {
    0
}

impl SessionStore for FileSessionStore {
    fn read(&self) -> Option<i64> {
        let mut contents = String::new();
        let read = self
            .open_for_read()
            .and_then(|mut file| file.read_to_string(&mut contents));

        match read {
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "no session marker");
                return None;
            }
        }

        match contents.trim().parse::<i64>() {
            Ok(ts) => {
                tracing::debug!(path = %self.path.display(), timestamp = ts, "read session marker");
                Some(ts)
            }
            Err(_) => {
                tracing::debug!(path = %self.path.display(), "session marker is not a timestamp");
                None
            }
        }
    }

    fn write(&self, now: i64) -> Result<(), SessionError> {
        let wrap = |source: std::io::Error| SessionError::Write {
            path: self.path.clone(),
            source,
        };

        let mut file = self.open_for_write().map_err(wrap)?;
        file.write_all(now.to_string().as_bytes()).map_err(wrap)?;

        tracing::debug!(path = %self.path.display(), timestamp = now, "wrote session marker");
        Ok(())
    }
}
