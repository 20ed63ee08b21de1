//! Error types for the lock engine
//!
//! Every variant of [`LockError`] is fatal: the screen cannot be considered
//! locked, so the caller reports it and exits. A wrong password is not an
//! error and never shows up here.

use thiserror::Error;

use crate::auth::AuthError;

/// Result type alias for lock operations
pub type Result<T> = std::result::Result<T, LockError>;

/// Fatal errors raised while setting up or running the lock
#[derive(Debug, Error)]
pub enum LockError {
    /// Could not talk to the display server
    #[error("Display error: {0}")]
    Display(String),

    /// Could not build the invisible cursor
    #[error("Could not create cursor: {0}")]
    Cursor(String),

    /// Keyboard grab refused or failed
    #[error("Could not grab keyboard: {0}")]
    GrabKeyboard(String),

    /// Pointer grab still failing after all retries
    #[error("Could not grab pointing device after {attempts} attempts")]
    GrabPointer { attempts: u32 },

    /// Input method or input context unavailable
    #[error("Could not open input method: {0}")]
    InputMethod(String),

    /// Event stream broke while locked
    #[error("Event source error: {0}")]
    EventSource(String),

    /// Credential could not be used
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
