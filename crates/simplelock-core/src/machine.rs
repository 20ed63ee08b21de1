//! Key event state machine
//!
//! One blocking loop owns the password buffer and the lockout timer. Each
//! key press is either dropped (inside a lockout window), edits the buffer,
//! or submits it. Nothing is shown to the user: a wrong password and a
//! dropped key press look exactly the same from the outside.

use zeroize::Zeroizing;

use crate::auth::Authenticator;
use crate::buffer::PasswordBuffer;
use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::event::{EventSource, InputEvent, InputMethod, KeyPress, Keysym, Lookup, Timestamp};
use crate::lockout::LockoutTimer;

/// Initial size of the translation buffer; grown on overflow
const INITIAL_LOOKUP_CAPACITY: usize = 32;

/// Outcome of handling one event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Keep waiting for input
    Continue,
    /// The correct password was entered
    Unlocked,
}

/// Returned by [`LockSession::run`] once the password was accepted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unlocked {
    /// Rejected submissions before the successful one
    pub failed_attempts: u32,
}

/// State of one lock, from grab to unlock
pub struct LockSession<'a, D, A> {
    device: &'a mut D,
    auth: &'a A,
    buffer: PasswordBuffer,
    lockout: LockoutTimer,
    scratch: Zeroizing<Vec<u8>>,
    failed_attempts: u32,
}

impl<'a, D, A> LockSession<'a, D, A>
where
    D: EventSource + InputMethod,
    A: Authenticator,
{
    pub fn new(device: &'a mut D, auth: &'a A, config: &LockConfig) -> Self {
        Self {
            device,
            auth,
            buffer: PasswordBuffer::new(&config.buffer),
            lockout: LockoutTimer::new(&config.lockout),
            scratch: Zeroizing::new(vec![0; INITIAL_LOOKUP_CAPACITY]),
            failed_attempts: 0,
        }
    }

    /// Replace the lockout timer (e.g. to start with a drained budget)
    pub fn with_lockout(mut self, lockout: LockoutTimer) -> Self {
        self.lockout = lockout;
        self
    }

    /// Block on events until the password is accepted
    ///
    /// Only returns an error if the event source itself breaks.
    pub fn run(&mut self) -> Result<Unlocked> {
        loop {
            let event = self
                .device
                .next_event()
                .map_err(|e| LockError::EventSource(e.to_string()))?;

            if self.handle_event(event) == Step::Unlocked {
                return Ok(Unlocked {
                    failed_attempts: self.failed_attempts,
                });
            }
        }
    }

    /// Process a single event
    pub fn handle_event(&mut self, event: InputEvent) -> Step {
        let key = match event {
            InputEvent::KeyPress(key) => key,
            InputEvent::Other => return Step::Continue,
        };

        if self.lockout.is_blocked(key.timestamp) {
            return Step::Continue;
        }

        let (keysym, len) = self.translate(&key);

        if let Some(sym) = keysym {
            if sym.is_clear() {
                self.buffer.clear();
                return Step::Continue;
            }
            if sym.is_erase() {
                self.buffer.pop();
                return Step::Continue;
            }
            if sym.is_submit() {
                return self.submit(key.timestamp);
            }
        }

        if len > 0 && !self.buffer.push(&self.scratch[..len]) {
            tracing::trace!("password length limit reached, key dropped");
        }

        Step::Continue
    }

    pub fn buffer(&self) -> &PasswordBuffer {
        &self.buffer
    }

    pub fn lockout(&self) -> &LockoutTimer {
        &self.lockout
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Run the input method, growing the scratch buffer once on overflow
    fn translate(&mut self, key: &KeyPress) -> (Option<Keysym>, usize) {
        let mut lookup = self.device.lookup(key, &mut self.scratch);

        if let Lookup::BufferOverflow(required) = lookup {
            // Replace rather than resize so the old allocation is wiped.
            self.scratch = Zeroizing::new(vec![0; required]);
            lookup = self.device.lookup(key, &mut self.scratch);
        }

        let capacity = self.scratch.len();
        match lookup {
            Lookup::None => (None, 0),
            Lookup::Chars(len) => (None, len.min(capacity)),
            Lookup::Keysym(sym) => (Some(sym), 0),
            Lookup::Both(sym, len) => (Some(sym), len.min(capacity)),
            Lookup::BufferOverflow(required) => {
                tracing::warn!(required, "input method overflowed twice, key dropped");
                (None, 0)
            }
        }
    }

    fn submit(&mut self, now: Timestamp) -> Step {
        let candidate = self.buffer.contents();

        match self.auth.verify(&candidate) {
            Ok(true) => {
                self.buffer.clear();
                tracing::info!(failed_attempts = self.failed_attempts, "password accepted");
                Step::Unlocked
            }
            Ok(false) => {
                self.reject(now);
                Step::Continue
            }
            Err(e) => {
                // The lock has to hold even if the credential vanished.
                tracing::error!("Could not verify password: {}", e);
                self.reject(now);
                Step::Continue
            }
        }
    }

    fn reject(&mut self, now: Timestamp) {
        self.buffer.clear();
        self.failed_attempts += 1;
        let until = self.lockout.on_failure(now);
        tracing::info!(
            failed_attempts = self.failed_attempts,
            blocked_for_ms = until - now,
            "password rejected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::config::BufferConfig;
    use std::collections::{HashMap, VecDeque};

    /// Keycodes map to fixed translations; events come from a queue
    struct ScriptedDevice {
        keys: HashMap<u32, (Option<Keysym>, Vec<u8>)>,
        events: VecDeque<InputEvent>,
        lookups: u32,
    }

    const KEY_RETURN: u32 = 36;
    const KEY_ESCAPE: u32 = 9;
    const KEY_BACKSPACE: u32 = 22;
    const KEY_SHIFT: u32 = 50;

    impl ScriptedDevice {
        fn new() -> Self {
            let mut keys = HashMap::new();
            keys.insert(KEY_RETURN, (Some(Keysym::RETURN), b"\r".to_vec()));
            keys.insert(KEY_ESCAPE, (Some(Keysym::ESCAPE), vec![0x1b]));
            keys.insert(KEY_BACKSPACE, (Some(Keysym::BACKSPACE), vec![0x08]));
            keys.insert(KEY_SHIFT, (Some(Keysym(0xffe1)), Vec::new()));
            for (i, c) in ('a'..='z').enumerate() {
                keys.insert(100 + i as u32, (Some(Keysym(c as u32)), vec![c as u8]));
            }
            keys.insert(200, (None, "€".as_bytes().to_vec()));
            Self {
                keys,
                events: VecDeque::new(),
                lookups: 0,
            }
        }
    }

    impl EventSource for ScriptedDevice {
        type Error = String;

        fn next_event(&mut self) -> std::result::Result<InputEvent, String> {
            self.events.pop_front().ok_or_else(|| "connection closed".to_string())
        }
    }

    impl InputMethod for ScriptedDevice {
        fn lookup(&mut self, key: &KeyPress, buf: &mut [u8]) -> Lookup {
            self.lookups += 1;
            let Some((sym, chars)) = self.keys.get(&key.keycode) else {
                return Lookup::None;
            };
            if chars.len() > buf.len() {
                return Lookup::BufferOverflow(chars.len());
            }
            buf[..chars.len()].copy_from_slice(chars);
            match (sym, chars.len()) {
                (Some(sym), 0) => Lookup::Keysym(*sym),
                (Some(sym), n) => Lookup::Both(*sym, n),
                (None, 0) => Lookup::None,
                (None, n) => Lookup::Chars(n),
            }
        }
    }

    struct FixedPassword(&'static [u8]);

    impl Authenticator for FixedPassword {
        fn verify(&self, candidate: &[u8]) -> std::result::Result<bool, AuthError> {
            Ok(candidate == self.0)
        }
    }

    struct MissingCredential;

    impl Authenticator for MissingCredential {
        fn verify(&self, _candidate: &[u8]) -> std::result::Result<bool, AuthError> {
            Err(AuthError::NotSet)
        }
    }

    fn letter(c: char) -> u32 {
        100 + (c as u32 - 'a' as u32)
    }

    fn press(ts: Timestamp, keycode: u32) -> InputEvent {
        InputEvent::KeyPress(KeyPress::new(ts, keycode))
    }

    fn type_word(session: &mut LockSession<'_, ScriptedDevice, impl Authenticator>, ts: Timestamp, word: &str) -> Step {
        let mut step = Step::Continue;
        for c in word.chars() {
            step = session.handle_event(press(ts, letter(c)));
        }
        step
    }

    #[test]
    fn test_typing_fills_buffer() {
        let mut device = ScriptedDevice::new();
        let auth = FixedPassword(b"abc");
        let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());

        type_word(&mut session, 1, "abc");
        assert_eq!(session.buffer().contents().as_slice(), b"abc");
    }

    #[test]
    fn test_correct_password_unlocks() {
        let mut device = ScriptedDevice::new();
        let auth = FixedPassword(b"abc");
        let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());

        type_word(&mut session, 1, "abc");
        assert_eq!(session.handle_event(press(2, KEY_RETURN)), Step::Unlocked);
        assert!(session.buffer().is_empty());
    }

    #[test]
    fn test_wrong_password_arms_lockout() {
        let mut device = ScriptedDevice::new();
        let auth = FixedPassword(b"abc");
        let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());

        type_word(&mut session, 1_000, "abd");
        assert_eq!(session.handle_event(press(1_000, KEY_RETURN)), Step::Continue);

        assert!(session.buffer().is_empty());
        assert_eq!(session.failed_attempts(), 1);
        assert_eq!(session.lockout().blocked_until(), Some(76_000));
    }

    #[test]
    fn test_drained_goodwill_blocks_for_base_timeout() {
        let mut device = ScriptedDevice::new();
        let auth = FixedPassword(b"abc");
        let config = LockConfig::default();
        let drained = LockoutTimer::new(&config.lockout).with_goodwill(0);
        let mut session = LockSession::new(&mut device, &auth, &config).with_lockout(drained);

        session.handle_event(press(1_000, KEY_RETURN));
        assert_eq!(session.lockout().blocked_until(), Some(31_000));
        assert_eq!(session.lockout().goodwill(), 0);
    }

    #[test]
    fn test_keys_during_lockout_are_dropped() {
        let mut device = ScriptedDevice::new();
        let auth = FixedPassword(b"abc");
        let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());

        session.handle_event(press(0, KEY_RETURN));
        let until = session.lockout().blocked_until().unwrap();

        assert_eq!(type_word(&mut session, until - 1, "abc"), Step::Continue);
        assert!(session.buffer().is_empty());
        assert_eq!(session.handle_event(press(until - 1, KEY_RETURN)), Step::Continue);
        assert_eq!(session.failed_attempts(), 1);

        type_word(&mut session, until, "abc");
        assert_eq!(session.handle_event(press(until, KEY_RETURN)), Step::Unlocked);
    }

    #[test]
    fn test_escape_and_backspace() {
        let mut device = ScriptedDevice::new();
        let auth = FixedPassword(b"abc");
        let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());

        type_word(&mut session, 1, "xy");
        session.handle_event(press(1, KEY_ESCAPE));
        assert!(session.buffer().is_empty());

        session.handle_event(press(1, KEY_BACKSPACE));
        assert!(session.buffer().is_empty());

        type_word(&mut session, 1, "abx");
        session.handle_event(press(1, KEY_BACKSPACE));
        type_word(&mut session, 1, "c");
        assert_eq!(session.buffer().contents().as_slice(), b"abc");
    }

    #[test]
    fn test_keysym_without_chars_is_ignored() {
        let mut device = ScriptedDevice::new();
        let auth = FixedPassword(b"abc");
        let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());

        session.handle_event(press(1, KEY_SHIFT));
        session.handle_event(press(1, 999));
        session.handle_event(InputEvent::Other);
        assert!(session.buffer().is_empty());
    }

    #[test]
    fn test_buffer_overflow_retries_lookup() {
        let mut device = ScriptedDevice::new();
        let euro = "€".as_bytes().to_vec();
        device.keys.insert(201, (None, vec![b'x'; 100]));
        let auth = FixedPassword(b"abc");
        {
            let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());
            session.handle_event(press(1, 200));
            session.handle_event(press(1, 201));

            let mut expected = euro.clone();
            expected.extend(vec![b'x'; 100]);
            assert_eq!(session.buffer().contents().as_slice(), expected.as_slice());
        }
        // one lookup for the euro sign, two for the oversized fragment
        assert_eq!(device.lookups, 3);
    }

    #[test]
    fn test_length_limit() {
        let mut device = ScriptedDevice::new();
        let auth = FixedPassword(b"abc");
        let mut config = LockConfig::default();
        config.buffer = BufferConfig { max_len: 2 };
        let mut session = LockSession::new(&mut device, &auth, &config);

        type_word(&mut session, 1, "abcdef");
        assert_eq!(session.buffer().contents().as_slice(), b"ab");
    }

    #[test]
    fn test_missing_credential_keeps_screen_locked() {
        let mut device = ScriptedDevice::new();
        let auth = MissingCredential;
        let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());

        type_word(&mut session, 1, "abc");
        assert_eq!(session.handle_event(press(1, KEY_RETURN)), Step::Continue);
        assert_eq!(session.failed_attempts(), 1);
        assert!(session.lockout().is_blocked(2));
    }

    #[test]
    fn test_run_until_unlocked() {
        let mut device = ScriptedDevice::new();
        device.events.extend([
            press(1, letter('x')),
            press(1, KEY_RETURN),
            InputEvent::Other,
            press(80_000, letter('o')),
            press(80_000, letter('k')),
            press(80_001, KEY_RETURN),
        ]);
        let auth = FixedPassword(b"ok");
        let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());

        let unlocked = session.run().unwrap();
        assert_eq!(unlocked.failed_attempts, 1);
    }

    #[test]
    fn test_run_surfaces_event_source_error() {
        let mut device = ScriptedDevice::new();
        device.events.push_back(press(1, letter('a')));
        let auth = FixedPassword(b"ok");
        let mut session = LockSession::new(&mut device, &auth, &LockConfig::default());

        assert!(matches!(session.run(), Err(LockError::EventSource(_))));
    }
}
