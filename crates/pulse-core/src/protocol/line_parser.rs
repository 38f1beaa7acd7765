//! Extracts heart-rate readings from decoded serial text.
//!
//! The sensor sketch alternates two lines every 800 ms:
//!
//! ```text
//! Signal: 512
//! BPM: 87
//! ```
//!
//! `Signal` is the raw analog sample (0..1023) and must never be mistaken for
//! a heart rate, so the parser only accepts a number that directly follows
//! the `BPM:` label.  A bare number anywhere else in the text is ignored.
//!
//! # Acceptance bands
//!
//! | Range        | Result                                              |
//! |--------------|-----------------------------------------------------|
//! | `0`          | rejected (sensor has not locked onto a pulse yet)   |
//! | `1..=29`     | accepted, flagged as outside the normal band        |
//! | `30..=250`   | accepted                                            |
//! | `> 250`      | rejected                                            |
//!
//! The accepted band is wider than the physiological one because the sensor
//! is noisy for the first few beats after a finger is placed on it.

use std::ops::RangeInclusive;
use std::time::Instant;

/// Smallest value surfaced as a reading.
pub const MIN_ACCEPTED_BPM: u16 = 1;
/// Largest value surfaced as a reading.
pub const MAX_ACCEPTED_BPM: u16 = 250;
/// Readings inside this band are considered physiologically plausible.
pub const NORMAL_BPM_BAND: RangeInclusive<u16> = 30..=250;

const BPM_LABEL: &[u8] = b"bpm:";

/// A single heart-rate sample.
///
/// Readings are ephemeral: the match controller consumes them and they are
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpmReading {
    /// Beats per minute.
    pub value: u16,
    /// When the reading was produced on this machine.
    pub timestamp: Instant,
}

impl BpmReading {
    /// Creates a reading stamped with the current instant.
    pub fn new(value: u16) -> Self {
        Self::at(value, Instant::now())
    }

    /// Creates a reading with an explicit timestamp.
    pub fn at(value: u16, timestamp: Instant) -> Self {
        Self { value, timestamp }
    }

    /// Returns `true` when the value lies inside [`NORMAL_BPM_BAND`].
    ///
    /// Callers log a warning for readings outside the band but still use them.
    pub fn is_within_normal_band(&self) -> bool {
        NORMAL_BPM_BAND.contains(&self.value)
    }
}

/// Parses the first labelled `BPM: <digits>` value from `raw`.
///
/// The label match is case-insensitive and tolerates any whitespace between
/// the colon and the digits.  A label without digits after it is skipped and
/// scanning continues.
///
/// Returns `None` when no labelled value exists or when the first labelled
/// value is outside `[MIN_ACCEPTED_BPM, MAX_ACCEPTED_BPM]`.
///
/// # Examples
///
/// ```rust
/// use pulse_core::parse_bpm;
///
/// assert_eq!(parse_bpm("BPM: 72").map(|r| r.value), Some(72));
/// assert_eq!(parse_bpm("Signal: 512"), None);
/// ```
pub fn parse_bpm(raw: &str) -> Option<BpmReading> {
    let value = find_labelled_value(raw)?;
    let accepted = u32::from(MIN_ACCEPTED_BPM)..=u32::from(MAX_ACCEPTED_BPM);
    if !accepted.contains(&value) {
        return None;
    }
    // The range check above guarantees the value fits.
    u16::try_from(value).ok().map(BpmReading::new)
}

fn find_labelled_value(raw: &str) -> Option<u32> {
    let bytes = raw.as_bytes();
    let mut start = 0;

    while start + BPM_LABEL.len() <= bytes.len() {
        let candidate = &bytes[start..start + BPM_LABEL.len()];
        if candidate.eq_ignore_ascii_case(BPM_LABEL) {
            let mut i = start + BPM_LABEL.len();
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let digits_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > digits_start {
                // Digit runs too long for u32 saturate; they are out of band anyway.
                return Some(raw[digits_start..i].parse::<u32>().unwrap_or(u32::MAX));
            }
        }
        start += 1;
    }

    None
}
