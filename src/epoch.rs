//! Epoch normalization.
//!
//! Every timestamp handed to the store is snapped to the start of its slot
//! and then shifted by a fixed local-time correction so that slots line up
//! with the local day boundary:
//!
//! ```text
//! epoch -= epoch % slot_duration
//! epoch += offset_seconds - (dst ? 3600 : 0)
//! ```
//!
//! The correction is configuration, never read from the host, so two stores
//! opened with the same [`TimeZone`] always agree on slot keys.

use crate::error::{Error, Result};

const DST_SHIFT_SECONDS: i64 = 3600;

/// Fixed local-time correction applied after slot alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeZone {
    /// Standard offset in seconds *west* of UTC (POSIX `timezone`).
    pub offset_seconds: i32,
    /// Whether daylight saving time is in effect.
    pub dst: bool,
}

impl TimeZone {
    pub const UTC: TimeZone = TimeZone {
        offset_seconds: 0,
        dst: false,
    };

    pub fn new(offset_seconds: i32, dst: bool) -> Self {
        Self {
            offset_seconds,
            dst,
        }
    }

    fn correction(&self) -> i64 {
        i64::from(self.offset_seconds) - if self.dst { DST_SHIFT_SECONDS } else { 0 }
    }
}

/// Maps raw timestamps to slot-aligned epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClock {
    slot_duration: u32,
    zone: TimeZone,
}

impl SlotClock {
    pub fn new(slot_duration: u32, zone: TimeZone) -> Result<Self> {
        if slot_duration == 0 {
            return Err(Error::InvalidInput(
                "slot duration must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            slot_duration,
            zone,
        })
    }

    /// Returns the normalized epoch for `epoch`. Wraps modulo 2^32 like the
    /// on-disk `u32` epoch it produces.
    pub fn normalize(&self, epoch: u32) -> u32 {
        let aligned = epoch - epoch % self.slot_duration;
        (i64::from(aligned) + self.zone.correction()) as u32
    }
}
