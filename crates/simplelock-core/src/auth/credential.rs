//! Single-file credential storage

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::AuthError;
use crate::config::LockConfig;

/// Reads and writes the one stored password hash
#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location under the config directory
    pub fn default_location() -> Result<Self, AuthError> {
        LockConfig::credential_path()
            .map(Self::new)
            .ok_or_else(|| AuthError::Storage("Could not determine config directory".to_string()))
    }

    /// Path of the credential file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a credential has been stored
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the stored hash
    pub fn load(&self) -> Result<String, AuthError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents.trim_end().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AuthError::NotSet),
            Err(e) => Err(AuthError::Storage(format!(
                "Failed to read {:?}: {}",
                self.path, e
            ))),
        }
    }

    /// Replace the stored hash
    pub fn store(&self, hash: &str) -> Result<(), AuthError> {
        if !hash.is_ascii() {
            return Err(AuthError::Hash("hash string must be ASCII".to_string()));
        }

        // Ensure directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = self.path.with_extension("tmp");
        let written = write_private(&temp_path, hash.as_bytes())
            .and_then(|()| fs::rename(&temp_path, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        tracing::debug!("Stored credential at {:?}", self.path);
        Ok(())
    }
}

/// Write `contents` to a fresh file that only the owner can read
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    // A leftover from an interrupted write may carry looser permissions
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
