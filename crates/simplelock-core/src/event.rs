//! Input events and the input-method boundary
//!
//! The state machine never sees protocol structures. A display adapter
//! turns whatever arrives on the wire into an [`InputEvent`], and an input
//! method turns a [`KeyPress`] into a [`Lookup`].

/// Milliseconds in the event time domain
pub type Timestamp = u64;

/// One event delivered to the lock window
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// A key went down
    KeyPress(KeyPress),
    /// Anything else (releases, pointer motion, exposure, ...)
    Other,
}

/// A raw key press, before input-method translation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyPress {
    /// Event time, milliseconds
    pub timestamp: Timestamp,
    /// Hardware keycode as reported by the server
    pub keycode: u32,
    /// Modifier and group state at the time of the press
    pub modifiers: u16,
}

impl KeyPress {
    pub fn new(timestamp: Timestamp, keycode: u32) -> Self {
        Self {
            timestamp,
            keycode,
            modifiers: 0,
        }
    }
}

/// A keysym value in the X11 keysym encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Keysym(pub u32);

impl Keysym {
    pub const BACKSPACE: Keysym = Keysym(0xff08);
    pub const LINEFEED: Keysym = Keysym(0xff0a);
    pub const CLEAR: Keysym = Keysym(0xff0b);
    pub const RETURN: Keysym = Keysym(0xff0d);
    pub const ESCAPE: Keysym = Keysym(0xff1b);
    pub const DELETE: Keysym = Keysym(0xffff);

    /// Escape or Clear: throw the typed password away
    pub fn is_clear(self) -> bool {
        self == Self::ESCAPE || self == Self::CLEAR
    }

    /// Delete or BackSpace: drop the last committed fragment
    pub fn is_erase(self) -> bool {
        self == Self::DELETE || self == Self::BACKSPACE
    }

    /// Linefeed or Return: submit the password
    pub fn is_submit(self) -> bool {
        self == Self::LINEFEED || self == Self::RETURN
    }
}

/// Result of translating a key press
///
/// Lengths refer to bytes written into the caller's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// Nothing committed (modifier, dead key waiting for more input, ...)
    None,
    /// Only characters were committed
    Chars(usize),
    /// Only a keysym was produced
    Keysym(Keysym),
    /// A keysym and the characters it commits
    Both(Keysym, usize),
    /// The buffer is too small; retry with at least this many bytes
    BufferOverflow(usize),
}

/// Blocking source of input events
pub trait EventSource {
    type Error: std::fmt::Display;

    /// Block until the next event arrives
    fn next_event(&mut self) -> Result<InputEvent, Self::Error>;
}

/// Input method translating key presses into keysyms and committed text
pub trait InputMethod {
    /// Translate `key`, writing committed UTF-8 bytes into `buf`
    fn lookup(&mut self, key: &KeyPress, buf: &mut [u8]) -> Lookup;
}
