//! Session time handling
//!
//! The engine never owns a clock. Every timestamp it sees comes in on a
//! sample, as seconds since the start of the measurement session, and every
//! duration check compares sample timestamps. Ticks with no new samples
//! therefore cannot advance a timer (a tick is not a unit of time here).

/// Timestamp in seconds since session start.
///
/// Fractional seconds are meaningful: device reads are not aligned to the
/// host's polling interval.
pub type Timestamp = f64;

/// Duration in seconds.
pub type Span = f64;

/// Seconds elapsed from `earlier` to `later`, clamped at zero.
///
/// Out-of-order timestamps are not expected from the collaborators; clamping
/// keeps a stray one from producing a negative "elapsed" that would satisfy
/// no duration check anyway.
pub fn elapsed(earlier: Timestamp, later: Timestamp) -> Span {
    let delta = later - earlier;
    if delta > 0.0 {
        delta
    } else {
        0.0
    }
}

/// Convert whole minutes to a [`Span`].
pub const fn minutes(m: u32) -> Span {
    (m as Span) * 60.0
}
