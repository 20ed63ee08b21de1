//! Exclusive input acquisition
//!
//! [`acquire`] walks a [`GrabBackend`] through window creation, cursor
//! setup, keyboard grab, pointer grab and input-context creation. Any
//! failure aborts: a mapped window without its grabs does not lock anything.
//!
//! The returned [`GrabHandle`] owns the backend and releases it exactly once
//! when dropped, so every exit path (unlock, fatal error, early `?` return
//! during setup) tears the grabs down.

use std::fmt;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::config::{CursorConfig, GrabPolicy};
use crate::error::{LockError, Result};

/// Server reply to a grab request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrabStatus {
    Success,
    AlreadyGrabbed,
    InvalidTime,
    NotViewable,
    Frozen,
}

/// Colour of a cursor plane
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorColor {
    /// Looked up in the server colour database
    Named(String),
    /// 16-bit red, green, blue
    Rgb(u16, u16, u16),
}

/// Bitmap cursor description
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorSpec {
    pub width: u16,
    pub height: u16,
    pub x_hot: u16,
    pub y_hot: u16,
    /// Source bitmap, LSB first, rows padded to whole bytes
    pub fg_bitmap: Vec<u8>,
    /// Mask bitmap, same layout
    pub bg_bitmap: Vec<u8>,
    pub fg: CursorColor,
    pub bg: CursorColor,
}

impl CursorSpec {
    /// A 1x1 cursor with every bit clear, so nothing is drawn
    pub fn invisible(colors: &CursorConfig) -> Self {
        Self {
            width: 1,
            height: 1,
            x_hot: 0,
            y_hot: 0,
            fg_bitmap: vec![0x00],
            bg_bitmap: vec![0x00],
            fg: colors.fg.clone(),
            bg: colors.bg.clone(),
        }
    }
}

/// Display capabilities needed to lock input
///
/// Implementations keep track of the resources they created so that
/// [`GrabBackend::release`] can free whatever exists at that point.
pub trait GrabBackend {
    type Cursor: Copy;
    type Error: fmt::Display;

    /// Create the invisible input-only window
    fn create_input_window(&mut self) -> std::result::Result<(), Self::Error>;

    /// Build a bitmap cursor from `spec`
    fn build_cursor(&mut self, spec: &CursorSpec) -> std::result::Result<Self::Cursor, Self::Error>;

    fn map_window(&mut self) -> std::result::Result<(), Self::Error>;

    fn grab_keyboard(&mut self) -> std::result::Result<GrabStatus, Self::Error>;

    /// Grab the pointer, showing `cursor` if given
    fn grab_pointer(
        &mut self,
        cursor: Option<Self::Cursor>,
    ) -> std::result::Result<GrabStatus, Self::Error>;

    /// Push pending requests to the server
    fn flush(&mut self) -> std::result::Result<(), Self::Error>;

    /// Open the input method and focus an input context on the window
    fn open_input_context(&mut self) -> std::result::Result<(), Self::Error>;

    /// Ungrab and destroy everything created so far
    fn release(&mut self);
}

/// Exclusive ownership of keyboard, pointer and lock window
pub struct GrabHandle<B: GrabBackend> {
    backend: B,
    released: bool,
}

impl<B: GrabBackend> GrabHandle<B> {
    fn new(backend: B) -> Self {
        Self {
            backend,
            released: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access for the event loop
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Release the grabs now instead of at drop
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.backend.release();
            tracing::debug!("input grabs released");
        }
    }
}

impl<B: GrabBackend> Drop for GrabHandle<B> {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Take exclusive control of keyboard and pointer
pub fn acquire<B: GrabBackend>(
    backend: B,
    hide_cursor: bool,
    policy: &GrabPolicy,
    cursor: &CursorSpec,
) -> Result<GrabHandle<B>> {
    let mut handle = GrabHandle::new(backend);
    let backend = handle.backend_mut();

    backend
        .create_input_window()
        .map_err(|e| LockError::Display(e.to_string()))?;

    let cursor = if hide_cursor {
        let id = backend
            .build_cursor(cursor)
            .map_err(|e| LockError::Cursor(e.to_string()))?;
        Some(id)
    } else {
        // keep the pointer as it is
        None
    };

    backend
        .map_window()
        .map_err(|e| LockError::Display(e.to_string()))?;

    match backend.grab_keyboard() {
        Ok(GrabStatus::Success) => {}
        Ok(status) => return Err(LockError::GrabKeyboard(format!("{:?}", status))),
        Err(e) => return Err(LockError::GrabKeyboard(e.to_string())),
    }

    grab_pointer_with_retry(backend, cursor, policy)?;

    backend
        .flush()
        .map_err(|e| LockError::Display(e.to_string()))?;

    backend
        .open_input_context()
        .map_err(|e| LockError::InputMethod(e.to_string()))?;

    tracing::info!(hide_cursor, "keyboard and pointer grabbed");
    Ok(handle)
}

/// The window manager may still hold the pointer right after a hotkey
/// launch, so keep asking for a while before giving up.
fn grab_pointer_with_retry<B: GrabBackend>(
    backend: &mut B,
    cursor: Option<B::Cursor>,
    policy: &GrabPolicy,
) -> Result<()> {
    for attempt in 1..=policy.pointer_attempts {
        match backend.grab_pointer(cursor) {
            Ok(GrabStatus::Success) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "pointer grabbed after retry");
                }
                return Ok(());
            }
            Ok(status) => tracing::debug!(attempt, ?status, "pointer grab refused"),
            Err(e) => tracing::debug!(attempt, error = %e, "pointer grab failed"),
        }

        if attempt < policy.pointer_attempts {
            thread::sleep(policy.pointer_retry_delay);
        }
    }

    Err(LockError::GrabPointer {
        attempts: policy.pointer_attempts,
    })
}
