//! Key press translation with xkbcommon
//!
//! The keymap is compiled from RMLVO names: configured names first, then the
//! names the X server publishes in `_XKB_RULES_NAMES`, then the
//! `XKB_DEFAULT_*` environment. Modifier and group state are taken from each
//! key event, so key releases never need to be tracked. Dead keys and
//! multi-key sequences go through the compose table of the current locale.

use std::env;
use std::ffi::OsString;

use simplelock_core::config::KeyboardConfig;
use simplelock_core::{InputMethod, KeyPress, Keysym, Lookup};
use xkbcommon::xkb;
use xkbcommon::xkb::compose;
use zeroize::Zeroizing;

use crate::x11::DisplayError;

/// Lock modifier bit in the core protocol state mask
const LOCK_MASK: u32 = 1 << 1;

/// Keymap state plus optional compose state
pub struct XkbInput {
    state: xkb::State,
    compose: Option<compose::State>,
    /// Translation that did not fit the caller's buffer, replayed on retry
    pending: Option<(KeyPress, Option<Keysym>, Zeroizing<String>)>,
}

impl XkbInput {
    pub fn new(config: &KeyboardConfig) -> Result<Self, DisplayError> {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap = xkb::Keymap::new_from_names(
            &context,
            &config.rules,
            &config.model,
            &config.layout,
            &config.variant,
            config.options.clone(),
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or_else(|| {
            DisplayError::Keymap(format!(
                "could not compile keymap (layout {:?}, variant {:?})",
                config.layout, config.variant
            ))
        })?;

        Ok(Self::from_keymap(&keymap, compose_state(&context)))
    }

    /// Input method over an already compiled keymap
    pub fn from_keymap(keymap: &xkb::Keymap, compose: Option<compose::State>) -> Self {
        Self {
            state: xkb::State::new(keymap),
            compose,
            pending: None,
        }
    }

    fn translate(&mut self, key: &KeyPress) -> (Option<Keysym>, Zeroizing<String>) {
        let mods = u32::from(key.modifiers);
        let group = (mods >> 13) & 0x3;
        self.state
            .update_mask(mods & 0xff & !LOCK_MASK, 0, mods & LOCK_MASK, 0, 0, group);

        let keycode = xkb::Keycode::new(key.keycode);
        let sym = self.state.key_get_one_sym(keycode);

        if let Some(compose) = self.compose.as_mut() {
            if matches!(compose.feed(sym), compose::FeedResult::Accepted) {
                match compose.status() {
                    compose::Status::Composing => return (None, Zeroizing::new(String::new())),
                    compose::Status::Composed => {
                        let text = Zeroizing::new(compose.utf8().unwrap_or_default());
                        let sym = compose.keysym().map(|s| Keysym(s.raw()));
                        compose.reset();
                        return (sym, text);
                    }
                    compose::Status::Cancelled => {
                        compose.reset();
                        return (None, Zeroizing::new(String::new()));
                    }
                    compose::Status::Nothing => {}
                }
            }
        }

        let text = Zeroizing::new(self.state.key_get_utf8(keycode));
        let sym = match sym.raw() {
            0 => None,
            raw => Some(Keysym(raw)),
        };
        (sym, text)
    }
}

impl InputMethod for XkbInput {
    fn lookup(&mut self, key: &KeyPress, buf: &mut [u8]) -> Lookup {
        let (sym, text) = match self.pending.take() {
            Some((pending_key, sym, text)) if pending_key == *key => (sym, text),
            _ => self.translate(key),
        };

        let len = text.len();
        if len > buf.len() {
            self.pending = Some((*key, sym, text));
            return Lookup::BufferOverflow(len);
        }
        buf[..len].copy_from_slice(text.as_bytes());

        match (sym, len) {
            (None, 0) => Lookup::None,
            (None, len) => Lookup::Chars(len),
            (Some(sym), 0) => Lookup::Keysym(sym),
            (Some(sym), len) => Lookup::Both(sym, len),
        }
    }
}

/// Decode the value of the root window's `_XKB_RULES_NAMES` property
///
/// The property holds rules, model, layout, variant and options as
/// NUL-terminated strings; missing trailing fields are empty.
pub fn parse_rules_names(value: &[u8]) -> KeyboardConfig {
    let mut fields = value
        .split(|&b| b == 0)
        .map(|field| String::from_utf8_lossy(field).into_owned());
    let mut next = || fields.next().unwrap_or_default();

    let rules = next();
    let model = next();
    let layout = next();
    let variant = next();
    let options = Some(next()).filter(|o| !o.is_empty());

    KeyboardConfig {
        rules,
        model,
        layout,
        variant,
        options,
    }
}

/// Compose state for the current locale, if it has a compose table
fn compose_state(context: &xkb::Context) -> Option<compose::State> {
    let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|var| env::var_os(var))
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| OsString::from("C"));

    match compose::Table::new_from_locale(context, &locale, compose::COMPILE_NO_FLAGS) {
        Ok(table) => Some(compose::State::new(&table, compose::STATE_NO_FLAGS)),
        Err(()) => {
            tracing::debug!(?locale, "no compose table, dead keys disabled");
            None
        }
    }
}
