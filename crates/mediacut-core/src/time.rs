// crates/mediacut-core/src/time.rs
//
// Timeline time is integer milliseconds everywhere. Source-media timestamps
// live in their own rational time base and are converted at the pipeline
// boundary (mediacut-media::convert); nothing in this crate sees a PTS.

use serde::{Deserialize, Serialize};

/// A rational number, used for track frame rates (e.g. 30000/1001).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub num: i32,
    pub den: i32,
}

impl Ratio {
    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Frame index containing timeline position `pos_ms`:
    /// `floor(pos * num / (den * 1000))`.
    pub fn frame_index_at(&self, pos_ms: i64) -> i64 {
        pos_ms * self.num as i64 / (self.den as i64 * 1000)
    }

    /// Timeline position (ms) of frame `index`.
    pub fn pos_at_frame(&self, index: i64) -> i64 {
        index * 1000 * self.den as i64 / self.num as i64
    }

    /// Duration of one frame in milliseconds, rounded down.
    pub fn frame_duration_ms(&self) -> i64 {
        1000 * self.den as i64 / self.num as i64
    }
}

/// Format a millisecond position as `HH:MM:SS.mmm` for log output.
pub fn format_millis(millis: i64) -> String {
    let (sign, mut t) = if millis < 0 {
        ("-", (-millis) as u64)
    } else {
        ("", millis as u64)
    };
    let ms = t % 1000;
    t /= 1000;
    let sec = t % 60;
    t /= 60;
    let min = t % 60;
    let hour = t / 60;
    format!("{sign}{hour:02}:{min:02}:{sec:02}.{ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_round_trips_at_frame_boundaries() {
        let r = Ratio::new(25, 1);
        for idx in [0, 1, 24, 25, 100] {
            let pos = r.pos_at_frame(idx);
            assert_eq!(r.frame_index_at(pos), idx);
        }
    }

    #[test]
    fn frame_index_is_floor() {
        let r = Ratio::new(25, 1); // 40 ms per frame
        assert_eq!(r.frame_index_at(39), 0);
        assert_eq!(r.frame_index_at(40), 1);
        assert_eq!(r.frame_index_at(79), 1);
    }

    #[test]
    fn ntsc_rate_maps_both_ways() {
        let r = Ratio::new(30000, 1001);
        // Frame 30 of 29.97 fps starts at 1001 ms.
        assert_eq!(r.pos_at_frame(30), 1001);
        assert_eq!(r.frame_index_at(1001), 30);
        assert_eq!(r.frame_index_at(1000), 29);
    }

    #[test]
    fn format_millis_matches_clock_layout() {
        assert_eq!(format_millis(0), "00:00:00.000");
        assert_eq!(format_millis(61_500), "00:01:01.500");
        assert_eq!(format_millis(-250), "-00:00:00.250");
        assert_eq!(format_millis(3_600_000 + 123), "01:00:00.123");
    }
}
