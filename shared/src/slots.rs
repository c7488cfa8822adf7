//! Slot arithmetic: turning a provider's working-hour window into a fixed
//! grid of bookable intervals, and deciding which grid slots survive the
//! occupied intervals of paid bookings.
//!
//! All times are minutes since midnight. Intervals are half-open: a slot
//! ending at 10:00 does not collide with one starting at 10:00.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grid step used when a request does not carry one. The grid is NOT derived
/// from the requested service duration; a 90-minute service is matched
/// against 60-minute grid slots.
pub const DEFAULT_STEP_MINUTES: u32 = 60;

/// Default service duration in minutes.
pub const DEFAULT_DURATION_MINUTES: u32 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("unparsable time of day: {0:?}")]
    InvalidTime(String),
    #[error("opening time must precede closing time")]
    InvalidWindow,
    #[error("slot step must be at least one minute")]
    InvalidStep,
}

/// A half-open `[start, end)` candidate interval, in minutes of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: u32,
    pub end: u32,
}

impl Slot {
    /// Renders the slot as `"HH:MM-HH:MM"`, the label stored on bookings.
    pub fn label(&self) -> String {
        format!("{}-{}", format_minute(self.start), format_minute(self.end))
    }
}

fn format_minute(minute: u32) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parses `"HH:MM"` into a minute of day.
pub fn parse_minute_of_day(value: &str) -> Result<u32, SlotError> {
    let invalid = || SlotError::InvalidTime(value.to_string());
    let (hours, minutes) = value.split_once(':').ok_or_else(invalid)?;
    let hours: u32 = hours.trim().parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.trim().parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

/// Parses the start of a slot label. Accepts both `"10:00-11:00"` and a bare
/// `"10:00"`.
pub fn parse_label_start(label: &str) -> Result<u32, SlotError> {
    let start = label.split('-').next().unwrap_or(label);
    parse_minute_of_day(start.trim())
}

/// Produces the ordered grid of `[start, start + step)` slots covering
/// `[open, close)`. A trailing remainder shorter than `step` is dropped.
/// Deterministic for identical inputs.
pub fn slot_grid(open: u32, close: u32, step: u32) -> Result<Vec<Slot>, SlotError> {
    if step == 0 {
        return Err(SlotError::InvalidStep);
    }
    if open >= close {
        return Err(SlotError::InvalidWindow);
    }
    let mut slots = Vec::new();
    let mut start = open;
    while start + step <= close {
        slots.push(Slot {
            start,
            end: start + step,
        });
        start += step;
    }
    Ok(slots)
}

/// Half-open interval overlap: `[a_start, a_end)` against `[b_start, b_end)`.
pub fn overlaps(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    !(a_end <= b_start || a_start >= b_end)
}

/// Filters the grid down to slots a booking of `duration` minutes could take
/// without touching any occupied interval. The requested duration, not the
/// grid step, decides the end of each candidate.
pub fn free_slots(grid: &[Slot], duration: u32, occupied: &[(u32, u32)]) -> Vec<Slot> {
    grid.iter()
        .copied()
        .filter(|slot| {
            let slot_end = slot.start + duration;
            !occupied
                .iter()
                .any(|&(occ_start, occ_end)| overlaps(slot.start, slot_end, occ_start, occ_end))
        })
        .collect()
}
