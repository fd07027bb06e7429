//! Output track cursors: one per output stream.

use crate::essence::{MediaCaps, Tags};
use crate::time::{scale, units_to_time, Rational, Timecode, SECOND};
use crate::ul::{TrackType, Uuid};

/// Playback state of one output stream
///
/// A cursor follows one timeline track of the chosen package. For a
/// material package it walks the track's source clips in turn, each
/// mapping to an essence track; for a top-level source package it reads
/// the one essence track directly.
#[derive(Debug, Clone)]
pub struct OutputTrackCursor {
    pub track_id: u32,
    pub material_package: Uuid,
    pub material_track: Uuid,
    pub material_edit_rate: Rational,
    pub track_type: TrackType,

    /// Running timestamp in nanoseconds
    pub position: u64,
    /// Sub-nanosecond remainder carried between buffers
    pub position_accumulated_error: f64,
    /// In material track edit units
    pub current_material_track_position: u64,

    /// `None` when playing a source package
    pub current_component: Option<usize>,
    /// First essence position of the component, in essence edit units
    pub current_component_start: u64,
    /// Material position the component starts at
    pub current_component_start_position: u64,
    /// In essence edit units, `None` when unknown
    pub current_component_duration: Option<u64>,

    /// Index into the demuxer's essence tracks
    pub current_essence_track: usize,
    pub current_essence_track_position: u64,

    pub eos: bool,
    pub discont: bool,
    pub need_segment: bool,
    pub tags_sent: bool,
    pub tags: Tags,
    pub start_timecode: Option<Timecode>,
    pub caps: Option<MediaCaps>,
}

impl OutputTrackCursor {
    pub fn new(
        track_id: u32,
        material_package: Uuid,
        material_track: Uuid,
        material_edit_rate: Rational,
        current_essence_track: usize,
    ) -> Self {
        Self {
            track_id,
            material_package,
            material_track,
            material_edit_rate,
            track_type: TrackType::Unknown,
            position: 0,
            position_accumulated_error: 0.0,
            current_material_track_position: 0,
            current_component: None,
            current_component_start: 0,
            current_component_start_position: 0,
            current_component_duration: None,
            current_essence_track,
            current_essence_track_position: 0,
            eos: false,
            discont: true,
            need_segment: true,
            tags_sent: false,
            tags: Tags::new(),
            start_timecode: None,
            caps: None,
        }
    }

    /// Duration of a buffer covering `edit_units` at `rate`.
    ///
    /// Durations are truncated to whole nanoseconds; the dropped fraction
    /// is accumulated and paid back one nanosecond at a time.
    pub fn buffer_duration(&mut self, edit_units: u64, rate: Rational) -> u64 {
        let (n, d) = rate.terms();
        if n == 0 {
            return 0;
        }
        let mut duration = scale(SECOND, edit_units.saturating_mul(d), n);

        let remainder = (u128::from(SECOND) * u128::from(edit_units) * u128::from(d)) % u128::from(n);
        self.position_accumulated_error += remainder as f64 / n as f64;
        if self.position_accumulated_error >= 1.0 {
            duration += 1;
            self.position_accumulated_error -= 1.0;
        }
        duration
    }

    /// Account for a delivered buffer.
    pub fn advance(&mut self, duration: u64, edit_units: u64) {
        self.position = self.position.saturating_add(duration);
        self.current_material_track_position += edit_units;
        self.current_essence_track_position += edit_units;
        self.discont = false;
    }

    /// Presentation time of essence edit unit `pts`, delayed by `shift`
    /// nanoseconds of reordering.
    ///
    /// `pts` is counted from the first essence edit unit of the current
    /// component and placed at the material position the component starts
    /// at, the same timeline the cursor's DTS runs on.
    pub fn presentation_time(&self, pts: u64, essence_rate: Rational, shift: u64) -> u64 {
        units_to_time(pts.saturating_sub(self.current_component_start), essence_rate)
            .saturating_add(units_to_time(
                self.current_component_start_position,
                self.material_edit_rate,
            ))
            .saturating_add(shift)
    }

    /// Essence position reached the end of the current component.
    pub fn component_finished(&self) -> bool {
        match self.current_component_duration {
            Some(duration) if duration > 0 => {
                self.current_essence_track_position
                    .saturating_sub(self.current_component_start)
                    >= duration
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor() -> OutputTrackCursor {
        OutputTrackCursor::new(1, Uuid::default(), Uuid::default(), Rational::new(25, 1), 0)
    }

    #[test]
    fn test_integer_rate_has_no_error() {
        let mut c = cursor();
        for _ in 0..100 {
            assert_eq!(c.buffer_duration(1, Rational::new(25, 1)), 40_000_000);
        }
        assert_eq!(c.position_accumulated_error, 0.0);
    }

    #[test]
    fn test_ntsc_durations_do_not_drift() {
        let rate = Rational::new(30000, 1001);
        let mut c = cursor();
        let mut total = 0u64;
        for _ in 0..3000 {
            let d = c.buffer_duration(1, rate);
            assert!(d == 33_366_666 || d == 33_366_667);
            c.advance(d, 1);
            total += d;
        }
        // 3000 frames at 30000/1001 is exactly 100.1 s
        let exact = 100_100_000_000u64;
        assert!(exact - total <= 1, "total {total}");
        assert_eq!(c.position, total);
        assert_eq!(c.current_essence_track_position, 3000);
        assert!(!c.discont);
    }

    #[test]
    fn test_component_finished() {
        let mut c = cursor();
        assert!(!c.component_finished());
        c.current_component_start = 10;
        c.current_component_duration = Some(5);
        c.current_essence_track_position = 14;
        assert!(!c.component_finished());
        c.current_essence_track_position = 15;
        assert!(c.component_finished());
        c.current_component_duration = Some(0);
        assert!(!c.component_finished());
    }

    #[test]
    fn test_presentation_time_follows_component_start() {
        let mut c = cursor();
        // second component: material units 10.., essence units 50..
        c.current_component_start = 50;
        c.current_component_start_position = 10;
        let rate = Rational::new(25, 1);

        // the component's first edit unit presents at material position 10
        assert_eq!(c.presentation_time(50, rate, 0), 400_000_000);
        assert_eq!(c.presentation_time(52, rate, 0), 480_000_000);
        assert_eq!(c.presentation_time(52, rate, 40_000_000), 520_000_000);
        // reordered before the component start clamps to it
        assert_eq!(c.presentation_time(49, rate, 0), 400_000_000);
    }

    #[test]
    fn test_presentation_time_with_material_rate() {
        let mut c = OutputTrackCursor::new(
            1,
            Uuid::default(),
            Uuid::default(),
            Rational::new(50, 1),
            0,
        );
        c.current_component_start_position = 10;
        // essence at 25 fps under a 50 fps material track
        assert_eq!(c.presentation_time(1, Rational::new(25, 1), 0), 240_000_000);
    }
}
