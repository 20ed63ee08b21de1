//! X11 display backend
//!
//! Implements [`GrabBackend`] and [`EventSource`] on top of an x11rb
//! connection. Every server resource created here is remembered so that
//! [`GrabBackend::release`] can undo exactly what exists.

use simplelock_core::config::KeyboardConfig;
use simplelock_core::{
    CursorColor, CursorSpec, EventSource, GrabBackend, GrabStatus, InputEvent, InputMethod,
    KeyPress, Lookup, Timestamp,
};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::xproto::{
    self, AtomEnum, ChangeGCAux, Colormap, ConnectionExt as _, CoordMode, CreateGCAux,
    CreateWindowAux, Cursor, EventMask, GrabMode, Pixmap, Point, Rectangle, Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::{COPY_DEPTH_FROM_PARENT, COPY_FROM_PARENT, CURRENT_TIME, NONE};

use crate::xkb::{parse_rules_names, XkbInput};

/// Root window property holding the server's RMLVO keymap names
const RULES_NAMES_PROPERTY: &[u8] = b"_XKB_RULES_NAMES";

/// Errors from the X11 backend
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("Could not connect to X server: {0}")]
    Connect(#[from] ConnectError),

    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("X request failed: {0}")]
    ReplyOrId(#[from] ReplyOrIdError),

    #[error("Lock window has not been created")]
    NoWindow,

    #[error("Keymap error: {0}")]
    Keymap(String),
}

/// Lock window and grabs on one X display
pub struct X11Display {
    conn: RustConnection,
    screen_num: usize,
    keyboard: KeyboardConfig,
    window: Option<Window>,
    cursor: Option<Cursor>,
    keyboard_grabbed: bool,
    pointer_grabbed: bool,
    clock: ServerClock,
    input: Option<XkbInput>,
}

impl X11Display {
    /// Connect to `display` (or `$DISPLAY`)
    pub fn connect(display: Option<&str>, keyboard: KeyboardConfig) -> Result<Self, DisplayError> {
        let (conn, screen_num) = x11rb::connect(display)?;
        tracing::debug!(screen_num, "connected to X server");

        Ok(Self {
            conn,
            screen_num,
            keyboard,
            window: None,
            cursor: None,
            keyboard_grabbed: false,
            pointer_grabbed: false,
            clock: ServerClock::default(),
            input: None,
        })
    }

    fn screen(&self) -> &xproto::Screen {
        &self.conn.setup().roots[self.screen_num]
    }

    fn window(&self) -> Result<Window, DisplayError> {
        self.window.ok_or(DisplayError::NoWindow)
    }

    /// Draw `bits` into a fresh depth-1 pixmap
    fn upload_bitmap(&self, width: u16, height: u16, bits: &[u8]) -> Result<Pixmap, DisplayError> {
        let root = self.screen().root;
        let pixmap = self.conn.generate_id()?;
        self.conn.create_pixmap(1, pixmap, root, width, height)?;

        let gc = self.conn.generate_id()?;
        self.conn
            .create_gc(gc, pixmap, &CreateGCAux::new().foreground(0))?;
        self.conn.poly_fill_rectangle(
            pixmap,
            gc,
            &[Rectangle {
                x: 0,
                y: 0,
                width,
                height,
            }],
        )?;

        let points = set_bits(width, height, bits);
        if !points.is_empty() {
            self.conn
                .change_gc(gc, &ChangeGCAux::new().foreground(1))?;
            self.conn
                .poly_point(CoordMode::ORIGIN, pixmap, gc, &points)?;
        }

        self.conn.free_gc(gc)?;
        Ok(pixmap)
    }

    /// Keymap names the server publishes on the root window, if any
    fn server_rules_names(&self) -> Result<Option<KeyboardConfig>, DisplayError> {
        let atom = self
            .conn
            .intern_atom(true, RULES_NAMES_PROPERTY)?
            .reply()?
            .atom;
        if atom == NONE {
            return Ok(None);
        }

        let reply = self
            .conn
            .get_property(false, self.screen().root, atom, AtomEnum::STRING, 0, 1024)?
            .reply()?;
        if reply.value.is_empty() {
            return Ok(None);
        }

        Ok(Some(parse_rules_names(&reply.value)))
    }

    fn alloc_color(
        &self,
        colormap: Colormap,
        color: &CursorColor,
    ) -> Result<(u16, u16, u16), DisplayError> {
        match color {
            CursorColor::Named(name) => {
                let reply = self
                    .conn
                    .alloc_named_color(colormap, name.as_bytes())?
                    .reply()?;
                Ok((reply.visual_red, reply.visual_green, reply.visual_blue))
            }
            CursorColor::Rgb(red, green, blue) => {
                let reply = self.conn.alloc_color(colormap, *red, *green, *blue)?.reply()?;
                Ok((reply.red, reply.green, reply.blue))
            }
        }
    }
}

impl GrabBackend for X11Display {
    type Cursor = Cursor;
    type Error = DisplayError;

    fn create_input_window(&mut self) -> Result<(), DisplayError> {
        let root = self.screen().root;
        let window = self.conn.generate_id()?;

        self.conn
            .create_window(
                COPY_DEPTH_FROM_PARENT,
                window,
                root,
                0,
                0,
                1,
                1,
                0,
                WindowClass::INPUT_ONLY,
                COPY_FROM_PARENT,
                &CreateWindowAux::new()
                    .override_redirect(1)
                    .event_mask(EventMask::KEY_PRESS),
            )?
            .check()?;

        self.window = Some(window);
        Ok(())
    }

    fn build_cursor(&mut self, spec: &CursorSpec) -> Result<Cursor, DisplayError> {
        self.window()?;
        let colormap = self.screen().default_colormap;

        let source = self.upload_bitmap(spec.width, spec.height, &spec.fg_bitmap)?;
        let mask = self.upload_bitmap(spec.width, spec.height, &spec.bg_bitmap)?;
        let (fg_red, fg_green, fg_blue) = self.alloc_color(colormap, &spec.fg)?;
        let (bg_red, bg_green, bg_blue) = self.alloc_color(colormap, &spec.bg)?;

        let cursor = self.conn.generate_id()?;
        let created = self
            .conn
            .create_cursor(
                cursor, source, mask, fg_red, fg_green, fg_blue, bg_red, bg_green, bg_blue,
                spec.x_hot, spec.y_hot,
            )?
            .check();

        self.conn.free_pixmap(source)?;
        self.conn.free_pixmap(mask)?;
        created?;

        self.cursor = Some(cursor);
        Ok(cursor)
    }

    fn map_window(&mut self) -> Result<(), DisplayError> {
        let window = self.window()?;
        self.conn.map_window(window)?.check()?;
        Ok(())
    }

    fn grab_keyboard(&mut self) -> Result<GrabStatus, DisplayError> {
        let window = self.window()?;
        let reply = self
            .conn
            .grab_keyboard(false, window, CURRENT_TIME, GrabMode::ASYNC, GrabMode::ASYNC)?
            .reply()?;

        let status = grab_status(reply.status);
        self.keyboard_grabbed = status == GrabStatus::Success;
        Ok(status)
    }

    fn grab_pointer(&mut self, cursor: Option<Cursor>) -> Result<GrabStatus, DisplayError> {
        let window = self.window()?;
        let reply = self
            .conn
            .grab_pointer(
                false,
                window,
                EventMask::NO_EVENT,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                NONE,
                cursor.unwrap_or(NONE),
                CURRENT_TIME,
            )?
            .reply()?;

        let status = grab_status(reply.status);
        self.pointer_grabbed = status == GrabStatus::Success;
        Ok(status)
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        self.conn.flush()?;
        Ok(())
    }

    fn open_input_context(&mut self) -> Result<(), DisplayError> {
        self.window()?;

        let keyboard = match self.server_rules_names() {
            Ok(Some(server)) => self.keyboard.clone().with_fallback(server),
            Ok(None) => self.keyboard.clone(),
            Err(e) => {
                tracing::warn!("Could not read server keymap names: {}", e);
                self.keyboard.clone()
            }
        };
        tracing::debug!(
            rules = %keyboard.rules,
            model = %keyboard.model,
            layout = %keyboard.layout,
            variant = %keyboard.variant,
            "compiling keymap"
        );

        self.input = Some(XkbInput::new(&keyboard)?);
        Ok(())
    }

    fn release(&mut self) {
        // Best effort: the connection may already be gone.
        self.input = None;
        if self.pointer_grabbed {
            let _ = self.conn.ungrab_pointer(CURRENT_TIME);
            self.pointer_grabbed = false;
        }
        if self.keyboard_grabbed {
            let _ = self.conn.ungrab_keyboard(CURRENT_TIME);
            self.keyboard_grabbed = false;
        }
        if let Some(cursor) = self.cursor.take() {
            let _ = self.conn.free_cursor(cursor);
        }
        if let Some(window) = self.window.take() {
            let _ = self.conn.destroy_window(window);
        }
        if let Err(e) = self.conn.flush() {
            tracing::warn!("Could not flush X connection on release: {}", e);
        }
    }
}

impl EventSource for X11Display {
    type Error = DisplayError;

    fn next_event(&mut self) -> Result<InputEvent, DisplayError> {
        let event = match self.conn.wait_for_event()? {
            Event::KeyPress(ev) => InputEvent::KeyPress(KeyPress {
                timestamp: self.clock.widen(ev.time),
                keycode: u32::from(ev.detail),
                modifiers: u16::from(ev.state),
            }),
            Event::Error(err) => {
                tracing::debug!(?err, "X error event");
                InputEvent::Other
            }
            _ => InputEvent::Other,
        };
        Ok(event)
    }
}

impl InputMethod for X11Display {
    fn lookup(&mut self, key: &KeyPress, buf: &mut [u8]) -> Lookup {
        match self.input.as_mut() {
            Some(input) => input.lookup(key, buf),
            None => Lookup::None,
        }
    }
}

fn grab_status(status: xproto::GrabStatus) -> GrabStatus {
    if status == xproto::GrabStatus::SUCCESS {
        GrabStatus::Success
    } else if status == xproto::GrabStatus::ALREADY_GRABBED {
        GrabStatus::AlreadyGrabbed
    } else if status == xproto::GrabStatus::INVALID_TIME {
        GrabStatus::InvalidTime
    } else if status == xproto::GrabStatus::NOT_VIEWABLE {
        GrabStatus::NotViewable
    } else {
        GrabStatus::Frozen
    }
}

/// Coordinates of the set bits of an LSB-first bitmap with byte-padded rows
fn set_bits(width: u16, height: u16, bits: &[u8]) -> Vec<Point> {
    let stride = usize::from(width).div_ceil(8);
    let mut points = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let index = usize::from(y) * stride + usize::from(x) / 8;
            let set = bits
                .get(index)
                .is_some_and(|&byte| (byte >> (x % 8)) & 1 == 1);
            if set {
                points.push(Point {
                    x: x as i16,
                    y: y as i16,
                });
            }
        }
    }

    points
}

/// Events may arrive this far out of order (ms) and still count as earlier
const CLOCK_REORDER_WINDOW: u32 = 60_000;

/// Widens the server's 32-bit millisecond clock, which wraps every ~49 days
#[derive(Debug, Default)]
struct ServerClock {
    /// Latest widened time seen so far
    latest: Option<u64>,
}

impl ServerClock {
    fn widen(&mut self, time: u32) -> Timestamp {
        let Some(latest) = self.latest else {
            self.latest = Some(u64::from(time));
            return u64::from(time);
        };

        // Low 32 bits of `latest` are the server time it was stamped with
        let latest_low = latest as u32;
        let behind = latest_low.wrapping_sub(time);
        if behind <= CLOCK_REORDER_WINDOW && u64::from(behind) <= latest {
            // Stamped before the latest event, possibly in the previous epoch
            return latest - u64::from(behind);
        }

        let widened = latest + u64::from(time.wrapping_sub(latest_low));
        self.latest = Some(widened);
        widened
    }
}
