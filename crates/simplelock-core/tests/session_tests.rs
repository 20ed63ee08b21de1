//! Integration tests: grab acquisition, the key event loop and the
//! password backend working together against a scripted display

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use argon2::Params;
use simplelock_core::{
    acquire, AuthError, Authenticator, CredentialStore, CursorSpec, EventSource, GrabBackend,
    GrabPolicy, GrabStatus, InputEvent, InputMethod, KeyPress, Keysym, LockConfig, LockError,
    LockSession, Lookup, PasswdBackend,
};
use tempfile::tempdir;

type Log = Rc<RefCell<Vec<String>>>;

/// Display double: records every call, fails on request, replays events
struct ScriptedDisplay {
    log: Log,
    fail_keyboard: bool,
    pointer_busy: bool,
    fail_input_context: bool,
    events: VecDeque<InputEvent>,
}

impl ScriptedDisplay {
    fn new(log: &Log) -> Self {
        Self {
            log: Rc::clone(log),
            fail_keyboard: false,
            pointer_busy: false,
            fail_input_context: false,
            events: VecDeque::new(),
        }
    }

    fn record(&self, call: &str) {
        self.log.borrow_mut().push(call.to_string());
    }
}

impl GrabBackend for ScriptedDisplay {
    type Cursor = u32;
    type Error = String;

    fn create_input_window(&mut self) -> Result<(), String> {
        self.record("create_window");
        Ok(())
    }

    fn build_cursor(&mut self, spec: &CursorSpec) -> Result<u32, String> {
        self.record(&format!("build_cursor {}x{}", spec.width, spec.height));
        Ok(1)
    }

    fn map_window(&mut self) -> Result<(), String> {
        self.record("map_window");
        Ok(())
    }

    fn grab_keyboard(&mut self) -> Result<GrabStatus, String> {
        self.record("grab_keyboard");
        if self.fail_keyboard {
            Err("BadWindow".to_string())
        } else {
            Ok(GrabStatus::Success)
        }
    }

    fn grab_pointer(&mut self, _cursor: Option<u32>) -> Result<GrabStatus, String> {
        self.record("grab_pointer");
        if self.pointer_busy {
            Ok(GrabStatus::AlreadyGrabbed)
        } else {
            Ok(GrabStatus::Success)
        }
    }

    fn flush(&mut self) -> Result<(), String> {
        self.record("flush");
        Ok(())
    }

    fn open_input_context(&mut self) -> Result<(), String> {
        self.record("open_input_context");
        if self.fail_input_context {
            Err("no input method".to_string())
        } else {
            Ok(())
        }
    }

    fn release(&mut self) {
        self.record("release");
    }
}

impl EventSource for ScriptedDisplay {
    type Error = String;

    fn next_event(&mut self) -> Result<InputEvent, String> {
        self.events
            .pop_front()
            .ok_or_else(|| "event queue exhausted".to_string())
    }
}

/// Keycode 36 is Return, anything else types its low byte as a character
impl InputMethod for ScriptedDisplay {
    fn lookup(&mut self, key: &KeyPress, buf: &mut [u8]) -> Lookup {
        if key.keycode == 36 {
            return Lookup::Keysym(Keysym::RETURN);
        }
        if buf.is_empty() {
            return Lookup::BufferOverflow(1);
        }
        buf[0] = key.keycode as u8;
        Lookup::Chars(1)
    }
}

fn count(log: &Log, call: &str) -> usize {
    log.borrow().iter().filter(|c| c.as_str() == call).count()
}

fn typed(ts: u64, text: &str) -> impl Iterator<Item = InputEvent> + '_ {
    text.bytes()
        .map(move |b| InputEvent::KeyPress(KeyPress::new(ts, u32::from(b))))
}

fn enter(ts: u64) -> InputEvent {
    InputEvent::KeyPress(KeyPress::new(ts, 36))
}

fn fast_policy() -> GrabPolicy {
    GrabPolicy {
        pointer_attempts: 3,
        pointer_retry_delay: Duration::from_millis(0),
    }
}

fn cursor() -> CursorSpec {
    CursorSpec::invisible(&LockConfig::default().cursor)
}

fn cheap_backend(dir: &std::path::Path) -> PasswdBackend {
    let store = CredentialStore::new(dir.join("simplelock").join("passwd"));
    PasswdBackend::with_params(store, Params::new(8, 1, 1, None).unwrap())
}

#[test]
fn test_keyboard_failure_releases_window() {
    let log: Log = Rc::default();
    let mut display = ScriptedDisplay::new(&log);
    display.fail_keyboard = true;

    let result = acquire(display, true, &fast_policy(), &cursor());

    assert!(matches!(result, Err(LockError::GrabKeyboard(_))));
    assert_eq!(count(&log, "grab_pointer"), 0);
    assert_eq!(count(&log, "release"), 1);
}

#[test]
fn test_input_method_failure_releases_grabs() {
    let log: Log = Rc::default();
    let mut display = ScriptedDisplay::new(&log);
    display.fail_input_context = true;

    let result = acquire(display, false, &fast_policy(), &cursor());

    assert!(matches!(result, Err(LockError::InputMethod(_))));
    assert_eq!(count(&log, "release"), 1);
}

#[test]
fn test_pointer_grab_gives_up_after_default_budget() {
    let log: Log = Rc::default();
    let mut display = ScriptedDisplay::new(&log);
    display.pointer_busy = true;

    let start = Instant::now();
    let result = acquire(display, true, &GrabPolicy::default(), &cursor());
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(LockError::GrabPointer { attempts: 100 })));
    assert_eq!(count(&log, "grab_pointer"), 100);
    // 99 pauses of 10 ms between 100 attempts
    assert!(elapsed >= Duration::from_millis(990));
    assert_eq!(count(&log, "release"), 1);
}

#[test]
fn test_full_lock_cycle() {
    let dir = tempdir().unwrap();
    let auth = cheap_backend(dir.path());
    auth.set_password(b"letmein").unwrap();

    let log: Log = Rc::default();
    let mut display = ScriptedDisplay::new(&log);
    display.events.extend(typed(10, "guess"));
    display.events.push_back(enter(11));
    // still inside the lockout window: swallowed
    display.events.extend(typed(20, "letmein"));
    display.events.push_back(enter(21));
    display.events.push_back(InputEvent::Other);
    display.events.extend(typed(100_000, "letmein"));
    display.events.push_back(enter(100_001));

    let config = LockConfig::default();
    let mut handle = acquire(display, true, &fast_policy(), &cursor()).unwrap();
    assert_eq!(count(&log, "release"), 0);

    let unlocked = LockSession::new(handle.backend_mut(), &auth, &config)
        .run()
        .unwrap();
    assert_eq!(unlocked.failed_attempts, 1);

    handle.release();
    assert_eq!(count(&log, "release"), 1);
    assert_eq!(log.borrow().first().map(String::as_str), Some("create_window"));
    assert!(log.borrow().contains(&"build_cursor 1x1".to_string()));
}

#[test]
fn test_broken_event_stream_still_releases() {
    let log: Log = Rc::default();
    let display = ScriptedDisplay::new(&log);
    let auth = cheap_backend(tempdir().unwrap().path());

    let result = (|| -> Result<(), LockError> {
        let mut handle = acquire(display, true, &fast_policy(), &cursor())?;
        LockSession::new(handle.backend_mut(), &auth, &LockConfig::default()).run()?;
        Ok(())
    })();

    assert!(matches!(result, Err(LockError::EventSource(_))));
    assert_eq!(count(&log, "release"), 1);
}

#[test]
fn test_empty_store_never_accepts() {
    let dir = tempdir().unwrap();
    let auth = cheap_backend(dir.path());

    assert!(matches!(auth.verify(b""), Err(AuthError::NotSet)));
    assert!(matches!(auth.verify(b"anything"), Err(AuthError::NotSet)));
}
