//! Edit rates, clock-time scaling and timecode.

use std::fmt;

/// Nanoseconds per second
pub const SECOND: u64 = 1_000_000_000;

/// Nanoseconds per millisecond
pub const MSECOND: u64 = 1_000_000;

/// A rational number such as an edit rate or sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rational {
    pub n: i32,
    pub d: i32,
}

impl Rational {
    pub const fn new(n: i32, d: i32) -> Self {
        Self { n, d }
    }

    /// Usable as an edit rate: both terms strictly positive.
    pub fn is_valid(&self) -> bool {
        self.n > 0 && self.d > 0
    }

    /// Numerator and denominator as unsigned values for scaling.
    pub(crate) fn terms(&self) -> (u64, u64) {
        (self.n.max(0) as u64, self.d.max(0) as u64)
    }

    pub fn as_f64(&self) -> f64 {
        if self.d == 0 {
            0.0
        } else {
            self.n as f64 / self.d as f64
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.n, self.d)
    }
}

/// Compute `val * num / denom` without intermediate overflow.
///
/// Saturates at `u64::MAX`; a zero denominator yields `u64::MAX`.
pub fn scale(val: u64, num: u64, denom: u64) -> u64 {
    if denom == 0 {
        return u64::MAX;
    }
    let r = (val as u128) * (num as u128) / (denom as u128);
    u64::try_from(r).unwrap_or(u64::MAX)
}

/// Edit units to nanoseconds at the given edit rate.
pub fn units_to_time(units: u64, rate: Rational) -> u64 {
    let (n, d) = rate.terms();
    scale(units, SECOND * d, n)
}

/// Nanoseconds to edit units at the given edit rate, rounding down.
pub fn time_to_units(time: u64, rate: Rational) -> u64 {
    let (n, d) = rate.terms();
    scale(time, n, d.saturating_mul(SECOND))
}

/// Rescale a position between two edit rates.
pub fn rescale_units(units: u64, from: Rational, to: Rational) -> u64 {
    let (fn_, fd) = from.terms();
    let (tn, td) = to.terms();
    scale(units, tn * fd, td * fn_)
}

/// SMPTE timecode anchored at a frame count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timecode {
    /// Nominal frames per second (rounded timecode base)
    pub fps: u16,
    pub drop_frame: bool,
    /// Frames since midnight
    pub frames: u64,
}

impl Timecode {
    pub fn new(fps: u16, drop_frame: bool, frames: u64) -> Self {
        Self {
            fps,
            drop_frame,
            frames,
        }
    }

    pub fn add_frames(&self, frames: u64) -> Self {
        Self {
            frames: self.frames.saturating_add(frames),
            ..*self
        }
    }

    /// Split into hours, minutes, seconds and frames.
    pub fn components(&self) -> (u64, u64, u64, u64) {
        let fps = u64::from(self.fps.max(1));
        let mut frames = self.frames;

        if self.drop_frame && fps % 30 == 0 {
            // two labels dropped per 30 fps unit every minute except each tenth
            let drop = 2 * (fps / 30);
            let per_ten_minutes = fps * 600 - drop * 9;
            let per_minute = fps * 60 - drop;
            let tens = frames / per_ten_minutes;
            let rem = frames % per_ten_minutes;
            frames += drop * 9 * tens;
            if rem > drop {
                frames += drop * ((rem - drop) / per_minute);
            }
        }

        let ff = frames % fps;
        let total_secs = frames / fps;
        (total_secs / 3600 % 24, total_secs / 60 % 60, total_secs % 60, ff)
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s, ff) = self.components();
        let sep = if self.drop_frame { ';' } else { ':' };
        write!(f, "{h:02}:{m:02}:{s:02}{sep}{ff:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_no_overflow() {
        assert_eq!(scale(u64::MAX / 2, 4, 2), u64::MAX - 1);
        assert_eq!(scale(10, 1, 0), u64::MAX);
        assert_eq!(units_to_time(3, Rational::new(25, 1)), 120 * MSECOND);
        assert_eq!(time_to_units(119 * MSECOND, Rational::new(25, 1)), 2);
        assert_eq!(
            rescale_units(48_000, Rational::new(48_000, 1), Rational::new(25, 1)),
            25
        );
    }

    #[test]
    fn test_ntsc_unit_time() {
        let rate = Rational::new(30000, 1001);
        assert_eq!(units_to_time(1, rate), 33_366_666);
        assert_eq!(units_to_time(30000, rate), 1001 * SECOND);
    }

    #[test]
    fn test_timecode_display() {
        let tc = Timecode::new(25, false, 25 * 3661 + 7);
        assert_eq!(tc.to_string(), "01:01:01:07");

        // first label after the minute boundary skips ;00 and ;01
        let df = Timecode::new(30, true, 1800);
        assert_eq!(df.to_string(), "00:01:00;02");
        let ten = Timecode::new(30, true, 17982);
        assert_eq!(ten.to_string(), "00:10:00;00");
    }
}
