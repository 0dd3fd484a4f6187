// crates/mediacut-media/src/cache.rs
//
// Time-sorted frame cache behind scrubbing-mode async seek. The render task
// pours every decoded frame in here and publishes the cached frame closest
// to the scrub target; the cache keeps itself small by discarding from
// whichever end is farther from the target.

use mediacut_core::VideoFrame;

/// Hard cap before a shrink pass runs.
pub const MAX_CACHE_SIZE: usize = 64;
/// Shrink target once the cap is exceeded.
pub const CACHE_SHRINK_SIZE: usize = 48;
/// Two frames closer together than this are considered duplicates.
pub const MIN_CACHE_FRAME_INTERVAL_MS: i64 = 500;

#[derive(Default)]
pub struct FrameCache {
    /// Sorted ascending by `time_stamp`.
    frames: Vec<VideoFrame>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Insert a decoded frame, keeping the cache sorted. Frames within
    /// `MIN_CACHE_FRAME_INTERVAL_MS` of an existing entry are skipped; when
    /// the cache exceeds `MAX_CACHE_SIZE` it is shrunk to `CACHE_SHRINK_SIZE`
    /// by discarding from the end farther from `target_ms`.
    ///
    /// Returns true when the frame was actually cached.
    pub fn insert(&mut self, frame: VideoFrame, target_ms: i64) -> bool {
        let ts = frame.time_stamp;
        let idx = self.frames.partition_point(|f| f.time_stamp < ts);
        let near_prev = idx > 0
            && (ts - self.frames[idx - 1].time_stamp).abs() < MIN_CACHE_FRAME_INTERVAL_MS;
        let near_next = idx < self.frames.len()
            && (self.frames[idx].time_stamp - ts).abs() < MIN_CACHE_FRAME_INTERVAL_MS;
        if near_prev || near_next {
            return false;
        }
        self.frames.insert(idx, frame);

        if self.frames.len() > MAX_CACHE_SIZE {
            self.shrink_towards(target_ms);
        }
        true
    }

    fn shrink_towards(&mut self, target_ms: i64) {
        while self.frames.len() > CACHE_SHRINK_SIZE {
            let front_dist = (self.frames.first().unwrap().time_stamp - target_ms).abs();
            let back_dist = (self.frames.last().unwrap().time_stamp - target_ms).abs();
            if front_dist > back_dist {
                self.frames.remove(0);
            } else {
                self.frames.pop();
            }
        }
    }

    /// The cached frame whose timestamp is closest to `target_ms`.
    pub fn closest(&self, target_ms: i64) -> Option<&VideoFrame> {
        self.frames
            .iter()
            .min_by_key(|f| (f.time_stamp - target_ms).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: i64) -> VideoFrame {
        VideoFrame::empty(ts)
    }

    #[test]
    fn duplicates_within_half_second_are_skipped() {
        let mut cache = FrameCache::new();
        assert!(cache.insert(frame(1000), 0));
        assert!(!cache.insert(frame(1400), 0)); // 400 ms away
        assert!(cache.insert(frame(1500), 0)); // exactly 500 ms away
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn closest_prefers_nearest_timestamp() {
        let mut cache = FrameCache::new();
        for ts in [0, 1000, 2000, 3000] {
            cache.insert(frame(ts), 0);
        }
        assert_eq!(cache.closest(1400).unwrap().time_stamp, 1000);
        assert_eq!(cache.closest(2600).unwrap().time_stamp, 3000);
        assert!(FrameCache::new().closest(0).is_none());
    }

    #[test]
    fn cache_stays_bounded_while_scrubbing_a_short_span() {
        // 80 unique frames spanning 8 s while the target is held at 4.0 s:
        // the duplicate window thins them out and the cache stays well under
        // the shrink target, with a frame near the scrub point retained.
        let mut cache = FrameCache::new();
        for i in 0..80 {
            cache.insert(frame(i * 100), 4000);
        }
        assert!(cache.len() <= CACHE_SHRINK_SIZE);
        let best = cache.closest(4000).unwrap();
        assert!(
            (best.time_stamp - 4000).abs() <= MIN_CACHE_FRAME_INTERVAL_MS,
            "a frame near the target must survive, got {}",
            best.time_stamp
        );
    }

    #[test]
    fn shrink_discards_the_farther_end() {
        let mut cache = FrameCache::new();
        // Target sits at the high end, so shrinking must eat the low end.
        for i in 0..(MAX_CACHE_SIZE as i64 + 1) {
            cache.insert(frame(i * 1000), MAX_CACHE_SIZE as i64 * 1000);
        }
        assert_eq!(cache.len(), CACHE_SHRINK_SIZE);
        let min_ts = cache.frames.first().unwrap().time_stamp;
        assert!(min_ts > 0, "low end should have been discarded");
        assert_eq!(
            cache.frames.last().unwrap().time_stamp,
            MAX_CACHE_SIZE as i64 * 1000
        );
    }

    #[test]
    fn insert_keeps_sort_order() {
        let mut cache = FrameCache::new();
        for ts in [5000, 1000, 3000, 9000] {
            cache.insert(frame(ts), 0);
        }
        let stamps: Vec<i64> = cache.frames.iter().map(|f| f.time_stamp).collect();
        assert_eq!(stamps, vec![1000, 3000, 5000, 9000]);
    }
}
