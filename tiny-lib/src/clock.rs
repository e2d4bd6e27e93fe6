use crate::constants::{DATA_SIZE, TINY_RATE};
use serde::Serialize;
use std::fmt;

/// A reading of the box's free-running 32-bit tick counter.
///
/// The counter wraps modulo 2^32 (about 7.6 hours at [`TINY_RATE`]). Only
/// equality is meaningful to the protocol: a scheduled Port A change fires
/// when the counter is exactly equal to the requested value. No ordering is
/// provided, since "before" and "after" are ambiguous across a wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClockValue(pub u32);

impl ClockValue {
    pub const ZERO: ClockValue = ClockValue(0);

    /// Big-endian decode of a frame's data field
    pub const fn from_bytes(bytes: [u8; DATA_SIZE]) -> Self {
        ClockValue(u32::from_be_bytes(bytes))
    }

    pub const fn to_bytes(self) -> [u8; DATA_SIZE] {
        self.0.to_be_bytes()
    }

    pub const fn ticks(self) -> u32 {
        self.0
    }

    /// Advance by `ticks`, wrapping like the hardware counter does.
    pub const fn wrapping_add(self, ticks: u32) -> Self {
        ClockValue(self.0.wrapping_add(ticks))
    }

    /// Seconds since the last clock reset, assuming no wrap since then.
    pub fn as_secs(self) -> f64 {
        self.0 as f64 / TINY_RATE as f64
    }

    /// Nearest tick to `secs`, reduced modulo 2^32.
    pub fn from_secs(secs: f64) -> Self {
        let ticks = (secs * TINY_RATE as f64).round() as i64;
        ClockValue(ticks as u32)
    }
}

impl From<u32> for ClockValue {
    fn from(ticks: u32) -> Self {
        ClockValue(ticks)
    }
}

impl From<ClockValue> for u32 {
    fn from(clock: ClockValue) -> Self {
        clock.0
    }
}

impl fmt::Display for ClockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.7}s)", self.0, self.as_secs())
    }
}
