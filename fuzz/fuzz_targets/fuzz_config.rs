#![no_main]

use libfuzzer_sys::fuzz_target;
use simplelock_core::{LockConfig, LockoutTimer};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = toml::from_str::<LockConfig>(text) else {
        return;
    };
    if config.validate().is_err() {
        return;
    }

    // Any accepted config must drive the timer without panicking
    let mut timer = LockoutTimer::new(&config.lockout);
    let until = timer.on_failure(u64::MAX / 2);
    assert!(until >= u64::MAX / 2);
    assert!(timer.goodwill() <= timer.max_goodwill());
});
