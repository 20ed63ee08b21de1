//! simplelock - X11 adapters for the lock engine
//!
//! - [`x11`]: window, cursor, grabs and event delivery over x11rb
//! - [`xkb`]: key press translation with xkbcommon (keymap + compose)

pub mod x11;
pub mod xkb;

pub use x11::{DisplayError, X11Display};
pub use xkb::XkbInput;
