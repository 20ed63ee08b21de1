//! simplelock core - input grab, key event state machine and adaptive lockout
//!
//! This crate holds everything that decides whether the screen stays locked:
//! - Acquiring exclusive keyboard and pointer input ([`grab`])
//! - Turning key presses into a password ([`machine`], [`buffer`])
//! - Rate limiting wrong guesses ([`lockout`])
//! - Checking the password against the stored hash ([`auth`])
//!
//! The display protocol and the input method are reached through the
//! [`grab::GrabBackend`], [`event::EventSource`] and [`event::InputMethod`]
//! traits, so none of this code depends on X11.

pub mod auth;
pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod grab;
pub mod lockout;
pub mod machine;

pub use auth::{AuthError, Authenticator, CredentialStore, PasswdBackend};
pub use buffer::PasswordBuffer;
pub use config::{BufferConfig, CursorConfig, GrabPolicy, KeyboardConfig, LockConfig, LockoutConfig};
pub use error::{LockError, Result};
pub use event::{EventSource, InputEvent, InputMethod, KeyPress, Keysym, Lookup, Timestamp};
pub use grab::{acquire, CursorColor, CursorSpec, GrabBackend, GrabHandle, GrabStatus};
pub use lockout::LockoutTimer;
pub use machine::{LockSession, Step, Unlocked};

/// Application name used for the config directory
pub const APP_NAME: &str = "simplelock";
