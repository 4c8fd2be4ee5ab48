//! Timestamp validation, monotonic differencing, and interruptible sleep.
//!
//! `spec.md` §4.2. Timestamps are expressed the way the original C API
//! expressed them — seconds plus microseconds — rather than as an opaque
//! `Instant`, because callers (receivers driven by external key hardware,
//! keyers driven by an external timer) routinely need to construct or
//! compare them across threads and across the library boundary.

use std::time::{Duration, Instant};

use crate::error::CwError;

/// A point in time expressed as (seconds, microseconds) since an arbitrary
/// but fixed epoch — the process's own monotonic clock origin. Only ever
/// compared to other `TimeVal`s produced by this crate or validated through
/// [`validate_timestamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeVal {
    pub tv_sec: i64,
    pub tv_usec: i32,
}

impl TimeVal {
    pub fn new(tv_sec: i64, tv_usec: i32) -> Self {
        Self { tv_sec, tv_usec }
    }

    fn from_duration(d: Duration) -> Self {
        Self {
            tv_sec: d.as_secs() as i64,
            tv_usec: d.subsec_micros() as i32,
        }
    }

}

/// Monotonic clock origin, fixed at first use. `TimeVal`s are always
/// relative to this instant, which makes them cheap to synthesize in tests
/// without depending on the wall clock.
fn origin() -> Instant {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Read the host monotonic clock as a `TimeVal`.
pub fn now() -> TimeVal {
    TimeVal::from_duration(origin().elapsed())
}

/// Validate a caller-supplied timestamp, or read the host monotonic clock
/// when `None`.
///
/// `spec.md` §4.2: `tv_sec` must be non-negative and `tv_usec` must fall in
/// `[0, 1_000_000)`.
pub fn validate_timestamp(ts: Option<TimeVal>) -> Result<TimeVal, CwError> {
    match ts {
        None => Ok(now()),
        Some(tv) => {
            if tv.tv_sec < 0 || tv.tv_usec < 0 || tv.tv_usec >= 1_000_000 {
                Err(CwError::InvalidTimestamp)
            } else {
                Ok(tv)
            }
        }
    }
}

/// `base` advanced by `us` microseconds (which may be negative), used by
/// callers that compute a deadline rather than diffing two timestamps.
pub fn offset_us(base: TimeVal, us: i32) -> TimeVal {
    let total_us = base.tv_sec * 1_000_000 + base.tv_usec as i64 + us as i64;
    let sec = total_us.div_euclid(1_000_000);
    let usec = total_us.rem_euclid(1_000_000) as i32;
    TimeVal::new(sec, usec)
}

/// Signed microsecond difference `later - earlier`, saturated to `i32::MAX`.
///
/// `i32` is deliberately chosen over `i64`: even a 20-second Farnsworth word
/// gap (20_000_000 µs) fits comfortably, and saturating rather than
/// overflowing keeps every caller's arithmetic on `i32` safe.
pub fn diff_us(earlier: TimeVal, later: TimeVal) -> i32 {
    let sec_diff = later.tv_sec - earlier.tv_sec;
    let usec_diff = later.tv_usec as i64 - earlier.tv_usec as i64;
    let total = sec_diff.saturating_mul(1_000_000).saturating_add(usec_diff);
    if total > i32::MAX as i64 {
        i32::MAX
    } else if total < i32::MIN as i64 {
        i32::MIN
    } else {
        total as i32
    }
}

/// Sleep until the given deadline (a `TimeVal` produced by [`now`] plus an
/// offset), resuming from spurious wakeups until no time remains.
///
/// `std::thread::sleep` does not expose POSIX's `EINTR` semantics directly,
/// but a sleep can still return early on some platforms under load; the loop
/// below re-measures and re-sleeps rather than trusting a single sleep call,
/// which is the portable equivalent of the original's interruptible sleep.
pub fn sleep_until(deadline: TimeVal) {
    loop {
        let n = now();
        if n >= deadline {
            return;
        }
        let remaining_us = diff_us(n, deadline).max(0) as u64;
        if remaining_us == 0 {
            return;
        }
        std::thread::sleep(Duration::from_micros(remaining_us));
    }
}

/// Sleep for a fixed duration, used by cooperative sinks that must consume
/// wall-clock time without producing real audio (the null sink; silence
/// chunks).
pub fn sleep_us(us: u32) {
    if us > 0 {
        std::thread::sleep(Duration::from_micros(us as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_negative_sec() {
        assert_eq!(
            validate_timestamp(Some(TimeVal::new(-1, 0))),
            Err(CwError::InvalidTimestamp)
        );
    }

    #[test]
    fn validate_rejects_out_of_range_usec() {
        assert_eq!(
            validate_timestamp(Some(TimeVal::new(0, 1_000_000))),
            Err(CwError::InvalidTimestamp)
        );
        assert_eq!(
            validate_timestamp(Some(TimeVal::new(0, -1))),
            Err(CwError::InvalidTimestamp)
        );
    }

    #[test]
    fn validate_accepts_boundary() {
        assert!(validate_timestamp(Some(TimeVal::new(0, 0))).is_ok());
        assert!(validate_timestamp(Some(TimeVal::new(0, 999_999))).is_ok());
    }

    #[test]
    fn diff_is_zero_for_identical() {
        let a = TimeVal::new(10, 500);
        assert_eq!(diff_us(a, a), 0);
    }

    #[test]
    fn diff_saturates_on_overflow() {
        let a = TimeVal::new(0, 0);
        let b = TimeVal::new(i32::MAX as i64 * 2, 0);
        assert_eq!(diff_us(a, b), i32::MAX);
    }

    #[test]
    fn diff_handles_microsecond_borrow() {
        let a = TimeVal::new(1, 900_000);
        let b = TimeVal::new(2, 100_000);
        assert_eq!(diff_us(a, b), 200_000);
    }
}
