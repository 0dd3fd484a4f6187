// crates/mediacut-core/src/overlap.rs
//
// Derived record: the time intersection of two clips on the same track.
// Overlaps hold their member clips by id only and are regenerated by the
// owning track on every mutating clip operation - no cross-links to prune.

use crate::clip::Clip;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overlap {
    id:       i64,
    start:    i64,
    end:      i64,
    front_id: i64,
    rear_id:  i64,
}

impl Overlap {
    /// True when the clips share any time range (half-open intervals).
    pub fn has_overlap(a: &Clip, b: &Clip) -> bool {
        a.start() < b.end() && b.start() < a.end()
    }

    /// Build the overlap record for two intersecting clips. The front clip
    /// is the one that starts earlier; ties break on the smaller id.
    pub fn new(id: i64, a: &Clip, b: &Clip) -> Self {
        let (front, rear) = if (a.start(), a.id()) <= (b.start(), b.id()) {
            (a, b)
        } else {
            (b, a)
        };
        Self {
            id,
            start: front.start().max(rear.start()),
            end: front.end().min(rear.end()),
            front_id: front.id(),
            rear_id: rear.id(),
        }
    }

    /// Recompute the intersection after either member moved or was trimmed.
    /// A non-positive duration afterwards means the overlap no longer exists
    /// and the track drops it.
    pub fn update(&mut self, a: &Clip, b: &Clip) {
        *self = Self::new(self.id, a, b);
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn front_id(&self) -> i64 {
        self.front_id
    }

    pub fn rear_id(&self) -> i64 {
        self.rear_id
    }

    pub fn involves(&self, clip_id: i64) -> bool {
        self.front_id == clip_id || self.rear_id == clip_id
    }

    pub fn contains(&self, pos: i64) -> bool {
        pos >= self.start && pos < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{NullClipSource, SourceDesc};
    use crate::host::HostEnv;
    use std::path::PathBuf;
    use std::sync::Arc;
    use uuid::Uuid;

    fn clip(id: i64, start: i64, duration: i64) -> Clip {
        let source = Arc::new(SourceDesc {
            id: Uuid::new_v4(),
            path: PathBuf::from("/dev/null"),
            duration,
            video_size: None,
            has_audio: false,
        });
        let mut c = Clip::new(
            id,
            source,
            start,
            0,
            0,
            Box::new(NullClipSource::new(8, 8)),
            HostEnv::inert(),
        )
        .unwrap();
        c.set_start(start);
        c
    }

    #[test]
    fn intersection_uses_half_open_ranges() {
        let a = clip(1, 0, 1000);
        let b = clip(2, 1000, 500);
        assert!(!Overlap::has_overlap(&a, &b)); // touching is not overlapping

        let c = clip(3, 800, 700);
        assert!(Overlap::has_overlap(&a, &c));
        let ov = Overlap::new(0, &a, &c);
        assert_eq!((ov.start(), ov.end()), (800, 1000));
        assert_eq!(ov.front_id(), 1);
        assert_eq!(ov.rear_id(), 3);
    }

    #[test]
    fn front_tie_breaks_on_id() {
        let a = clip(9, 100, 500);
        let b = clip(2, 100, 300);
        let ov = Overlap::new(0, &a, &b);
        assert_eq!(ov.front_id(), 2);
        assert_eq!(ov.rear_id(), 9);
    }

    #[test]
    fn update_tracks_member_movement() {
        let a = clip(1, 0, 1000);
        let mut b = clip(2, 800, 700);
        let mut ov = Overlap::new(0, &a, &b);
        b.set_start(1200);
        ov.update(&a, &b);
        assert!(ov.duration() <= 0); // moved apart - track will drop it
    }
}
