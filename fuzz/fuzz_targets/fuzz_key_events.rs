#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use simplelock_core::{
    AuthError, Authenticator, BufferConfig, EventSource, InputEvent, InputMethod, KeyPress,
    Keysym, LockConfig, LockSession, Lookup, Step,
};

#[derive(Arbitrary, Debug)]
enum Key {
    Text(Vec<u8>),
    Sym(u32),
    SymText(u32, Vec<u8>),
    Nothing,
}

#[derive(Arbitrary, Debug)]
struct Input {
    max_len: u8,
    password: Vec<u8>,
    events: Vec<(u16, Option<Key>)>,
}

/// Keycode `n` translates to the fuzzer's n-th key
struct FuzzDevice {
    keys: Vec<Key>,
}

impl EventSource for FuzzDevice {
    type Error = &'static str;

    fn next_event(&mut self) -> Result<InputEvent, &'static str> {
        Err("driven by handle_event")
    }
}

impl InputMethod for FuzzDevice {
    fn lookup(&mut self, key: &KeyPress, buf: &mut [u8]) -> Lookup {
        let (sym, text) = match self.keys.get(key.keycode as usize) {
            None | Some(Key::Nothing) => return Lookup::None,
            Some(Key::Text(text)) => (None, text.as_slice()),
            Some(Key::Sym(sym)) => (Some(Keysym(*sym)), &[][..]),
            Some(Key::SymText(sym, text)) => (Some(Keysym(*sym)), text.as_slice()),
        };
        if text.len() > buf.len() {
            return Lookup::BufferOverflow(text.len());
        }
        buf[..text.len()].copy_from_slice(text);
        match (sym, text.len()) {
            (None, 0) => Lookup::None,
            (None, n) => Lookup::Chars(n),
            (Some(sym), 0) => Lookup::Keysym(sym),
            (Some(sym), n) => Lookup::Both(sym, n),
        }
    }
}

struct Fixed(Vec<u8>);

impl Authenticator for Fixed {
    fn verify(&self, candidate: &[u8]) -> Result<bool, AuthError> {
        Ok(candidate == self.0.as_slice())
    }
}

fuzz_target!(|input: Input| {
    let mut config = LockConfig::default();
    config.buffer = BufferConfig {
        max_len: input.max_len as usize,
    };
    let auth = Fixed(input.password);

    let mut keys = Vec::new();
    let mut events = Vec::new();
    let mut now = 0u64;
    for (gap, key) in input.events {
        now += u64::from(gap);
        match key {
            Some(key) => {
                events.push(InputEvent::KeyPress(KeyPress::new(now, keys.len() as u32)));
                keys.push(key);
            }
            None => events.push(InputEvent::Other),
        }
    }

    let mut device = FuzzDevice { keys };
    let mut session = LockSession::new(&mut device, &auth, &config);

    for event in events {
        let blocked_before = match &event {
            InputEvent::KeyPress(key) => session.lockout().is_blocked(key.timestamp),
            InputEvent::Other => false,
        };
        let before = session.buffer().contents();

        if session.handle_event(event) == Step::Unlocked {
            assert!(!blocked_before);
            return;
        }

        assert!(session.buffer().len() <= config.buffer.max_len);
        if blocked_before {
            assert_eq!(session.buffer().contents().as_slice(), before.as_slice());
        }
    }
});
