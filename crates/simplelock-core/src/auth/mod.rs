//! Password authentication
//!
//! The password is stored as a single Argon2id hash string in one file.
//! Verification goes through the [`Authenticator`] trait so the key event
//! loop can be driven without touching the filesystem.
//!
//! # Security Model
//!
//! - Password hashed with Argon2id and a random salt
//! - Verification compares in constant time
//! - A missing or unreadable credential is a configuration error, never a
//!   successful login

mod credential;
mod passwd;

pub use credential::CredentialStore;
pub use passwd::PasswdBackend;

/// Checks a candidate password
pub trait Authenticator {
    /// `Ok(true)` if `candidate` matches the stored credential, `Ok(false)`
    /// if it doesn't, `Err` if no comparison could be made
    fn verify(&self, candidate: &[u8]) -> Result<bool, AuthError>;
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No password has been set - run with --passwd first")]
    NotSet,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Stored password hash is invalid: {0}")]
    InvalidHash(String),

    #[error("Hashing failed: {0}")]
    Hash(String),
}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        AuthError::Storage(e.to_string())
    }
}
