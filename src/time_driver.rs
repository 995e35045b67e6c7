//! Time driver symbols for `async_io_mini::Timer`.
//!
//! The reactor timer is built on embassy-time's driver interface and links
//! against `_embassy_time_now` / `_embassy_time_schedule_wake`, which the
//! application has to provide.  Ticks are microseconds (embassy-time's
//! default 1 MHz tick rate).
//!
//! - **`target_os = "espidf"`**: `esp_timer_get_time`, the high-resolution
//!   timer counting since boot.
//! - **all other targets**: a monotonic clock anchored at first use, so
//!   host tests can drive the scheduler loop with real timers.
//!
//! The critical-section implementation embassy-sync needs is not provided
//! here: on target it comes from esp-idf-svc's `critical-section` feature,
//! on host from `critical-section/std`.

use core::ffi::c_void;
use core::task::Waker;
use core::time::Duration;

use log::warn;

/// Current time in microseconds.
#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _embassy_time_now() -> u64 {
    // SAFETY: plain read of the free-running esp_timer counter.
    let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    us.max(0) as u64
}

/// Current time in microseconds since the driver was first queried.
#[cfg(not(target_os = "espidf"))]
#[unsafe(no_mangle)]
pub extern "C" fn _embassy_time_now() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Wake `waker` once the clock reaches `at`.
///
/// Each registration parks a short-lived thread until the deadline.
#[unsafe(no_mangle)]
pub extern "C" fn _embassy_time_schedule_wake(at: u64, waker: *mut c_void) {
    if waker.is_null() {
        return;
    }

    // SAFETY: the caller passes a valid `&Waker` for the duration of the
    // call; it is cloned before returning.
    let waker = unsafe { (*(waker as *const Waker)).clone() };
    let fallback = waker.clone();
    let spawned = std::thread::Builder::new()
        .name("timer-wake".into())
        .stack_size(4 * 1024)
        .spawn(move || {
            let now = _embassy_time_now();
            if at > now {
                std::thread::sleep(Duration::from_micros(at - now));
            }
            waker.wake();
        });
    if let Err(e) = spawned {
        // The timer re-registers when polled, so waking early only costs a poll.
        warn!("Timer: wake thread not started: {}", e);
        fallback.wake();
    }
}
