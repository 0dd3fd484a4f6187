// crates/mediacut-core/src/track.rs
//
// Ordered clips + derived overlaps + monotone read cursors. The track is the
// only mutator of clip placement and the only owner of overlap records -
// overlaps are regenerated on every mutating clip operation, never patched
// incrementally.

use serde_json::{json, Value};

use crate::clip::{Clip, ClipSourceFactory};
use crate::error::{EngineError, EngineResult};
use crate::frame::VideoFrame;
use crate::host::HostEnv;
use crate::overlap::Overlap;
use crate::time::Ratio;
use crate::transitions::{Crossfade, VideoTransition};

pub struct Track {
    id:         i64,
    out_width:  u32,
    out_height: u32,
    frame_rate: Ratio,
    /// Sorted by (start, id).
    clips:    Vec<Clip>,
    /// Sorted by (start, id); members referenced by clip id only.
    overlaps: Vec<Overlap>,
    /// Read cursors. `len()` is the "none" sentinel, matching an end iterator.
    read_clip_idx:    usize,
    read_overlap_idx: usize,
    read_frame_index: i64,
    forward: bool,
    transition: Box<dyn VideoTransition>,
    next_overlap_id: i64,
}

impl Track {
    pub fn new(id: i64, out_width: u32, out_height: u32, frame_rate: Ratio) -> Self {
        Self {
            id,
            out_width,
            out_height,
            frame_rate,
            clips: Vec::new(),
            overlaps: Vec::new(),
            read_clip_idx: 0,
            read_overlap_idx: 0,
            read_frame_index: 0,
            forward: true,
            transition: Box::new(Crossfade),
            next_overlap_id: 0,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn out_width(&self) -> u32 {
        self.out_width
    }

    pub fn out_height(&self) -> u32 {
        self.out_height
    }

    pub fn frame_rate(&self) -> Ratio {
        self.frame_rate
    }

    pub fn is_forward(&self) -> bool {
        self.forward
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn overlaps(&self) -> &[Overlap] {
        &self.overlaps
    }

    /// Track duration = the furthest clip end, 0 when empty.
    pub fn duration(&self) -> i64 {
        self.clips.iter().map(Clip::end).max().unwrap_or(0)
    }

    /// Replace the overlap transition (default: dissolve).
    pub fn set_transition(&mut self, transition: Box<dyn VideoTransition>) {
        self.transition = transition;
    }

    // ── Clip mutations ────────────────────────────────────────────────────────

    /// Insert a clip. Its endpoints may not fall strictly inside an overlap
    /// formed by two *other* clips (the triple-overlap rule).
    pub fn insert_clip(&mut self, mut clip: Clip) -> EngineResult<()> {
        if self.clips.iter().any(|c| c.id() == clip.id()) {
            return Err(EngineError::already_exists(format!("clip with id {}", clip.id())));
        }
        if !self.check_clip_range_valid(clip.id(), clip.start(), clip.end()) {
            return Err(EngineError::invalid_arg(format!(
                "clip [{}, {}) lands inside an existing overlap",
                clip.start(),
                clip.end()
            )));
        }
        clip.set_direction(self.forward);
        clip.set_track_id(Some(self.id));
        let clip_id = clip.id();
        self.clips.push(clip);
        self.sort_clips();
        self.update_clip_overlap(clip_id);
        self.reseek();
        Ok(())
    }

    /// Move a clip to `new_start`, keeping its duration.
    pub fn move_clip(&mut self, id: i64, new_start: i64) -> EngineResult<()> {
        let (old_start, duration) = {
            let clip = self.clip_by_id(id)?;
            (clip.start(), clip.duration())
        };
        if old_start == new_start {
            return Ok(());
        }
        // Validate against the prospective range so a rejection leaves the
        // track untouched.
        if !self.check_clip_range_valid(id, new_start, new_start + duration) {
            return Err(EngineError::invalid_arg(format!(
                "moving clip {id} to {new_start} lands inside an existing overlap"
            )));
        }
        self.clip_by_id_mut(id)?.set_start(new_start);
        self.sort_clips();
        self.update_clip_overlap(id);
        self.reseek();
        Ok(())
    }

    /// Adjust the clip's source-offset endpoints.
    pub fn change_clip_range(&mut self, id: i64, start_offset: i64, end_offset: i64) -> EngineResult<()> {
        let idx = self.clip_index(id)?;
        let (old_so, old_eo) = {
            let c = &self.clips[idx];
            (c.start_offset(), c.end_offset())
        };
        {
            let c = &mut self.clips[idx];
            c.change_start_offset(start_offset);
            c.change_end_offset(end_offset);
        }
        if (old_so, old_eo) == (self.clips[idx].start_offset(), self.clips[idx].end_offset()) {
            return Ok(());
        }
        let (start, end) = (self.clips[idx].start(), self.clips[idx].end());
        if !self.check_clip_range_valid(id, start, end) {
            // Roll back - rejected mutations leave state unchanged.
            let c = &mut self.clips[idx];
            c.change_start_offset(old_so);
            c.change_end_offset(old_eo);
            return Err(EngineError::invalid_arg(format!(
                "trimming clip {id} lands inside an existing overlap"
            )));
        }
        self.sort_clips();
        self.update_clip_overlap(id);
        self.reseek();
        Ok(())
    }

    /// Remove a clip; returns it with `track_id` cleared. Every overlap that
    /// references it is pruned.
    pub fn remove_clip_by_id(&mut self, id: i64) -> Option<Clip> {
        let idx = self.clips.iter().position(|c| c.id() == id)?;
        Some(self.remove_at(idx))
    }

    pub fn remove_clip_by_index(&mut self, index: usize) -> EngineResult<Clip> {
        if index >= self.clips.len() {
            return Err(EngineError::invalid_arg(format!(
                "index {index} exceeds the clip count {}",
                self.clips.len()
            )));
        }
        Ok(self.remove_at(index))
    }

    fn remove_at(&mut self, index: usize) -> Clip {
        let mut clip = self.clips.remove(index);
        clip.set_track_id(None);
        let removed_id = clip.id();
        self.overlaps.retain(|ov| !ov.involves(removed_id));
        let read_pos = self.frame_rate.pos_at_frame(self.read_frame_index);
        if read_pos >= clip.start() && read_pos < clip.end() {
            self.seek_to(read_pos.max(0)).ok();
        } else {
            self.reseek();
        }
        clip
    }

    fn clip_index(&self, id: i64) -> EngineResult<usize> {
        self.clips
            .iter()
            .position(|c| c.id() == id)
            .ok_or_else(|| EngineError::not_found(format!("clip with id {id}")))
    }

    pub fn clip_by_id(&self, id: i64) -> EngineResult<&Clip> {
        self.clips
            .iter()
            .find(|c| c.id() == id)
            .ok_or_else(|| EngineError::not_found(format!("clip with id {id}")))
    }

    pub fn clip_by_id_mut(&mut self, id: i64) -> EngineResult<&mut Clip> {
        self.clips
            .iter_mut()
            .find(|c| c.id() == id)
            .ok_or_else(|| EngineError::not_found(format!("clip with id {id}")))
    }

    pub fn clip_by_index(&self, index: usize) -> Option<&Clip> {
        self.clips.get(index)
    }

    /// Flip the read direction; clips inherit it for their source mapping.
    pub fn set_direction(&mut self, forward: bool) {
        if self.forward == forward {
            return;
        }
        self.forward = forward;
        for clip in &mut self.clips {
            clip.set_direction(forward);
        }
    }

    // ── Seeking & reading ─────────────────────────────────────────────────────

    /// Position the read cursors at timeline position `pos` (ms).
    pub fn seek_to(&mut self, pos: i64) -> EngineResult<()> {
        if pos < 0 {
            return Err(EngineError::invalid_arg("seek position cannot be negative"));
        }
        let none = self.clips.len();
        if self.forward {
            self.read_clip_idx = none;
            for (i, clip) in self.clips.iter_mut().enumerate() {
                let clip_pos = pos - clip.start();
                clip.seek_to(clip_pos);
                if self.read_clip_idx == none && clip_pos < clip.duration() {
                    self.read_clip_idx = i;
                }
            }
            self.read_overlap_idx = self
                .overlaps
                .iter()
                .position(|ov| pos < ov.end())
                .unwrap_or(self.overlaps.len());
        } else {
            self.read_clip_idx = none;
            for (i, clip) in self.clips.iter_mut().enumerate().rev() {
                let clip_pos = pos - clip.start();
                clip.seek_to(clip_pos);
                if self.read_clip_idx == none && clip_pos >= 0 {
                    self.read_clip_idx = i;
                }
            }
            self.read_overlap_idx = self
                .overlaps
                .iter()
                .rposition(|ov| pos - ov.start() >= 0)
                .unwrap_or(self.overlaps.len());
        }
        self.read_frame_index = self.frame_rate.frame_index_at(pos);
        Ok(())
    }

    /// Produce the next frame and advance the read cursor one frame in the
    /// current direction. Gaps yield an empty frame with only `time_stamp`
    /// set; decode errors are logged and degrade to an empty frame.
    pub fn read_frame(&mut self) -> VideoFrame {
        let read_pos = self.frame_rate.pos_at_frame(self.read_frame_index);
        for clip in &mut self.clips {
            let clip_pos = read_pos - clip.start();
            clip.notify_read_pos(clip_pos);
        }

        let mut out = if self.forward {
            self.read_forward_at(read_pos)
        } else {
            self.read_reverse_at(read_pos)
        };

        out.time_stamp = read_pos;
        if self.forward {
            self.read_frame_index += 1;
        } else {
            self.read_frame_index -= 1;
        }
        out
    }

    fn read_forward_at(&mut self, read_pos: i64) -> VideoFrame {
        // Overlaps take precedence over plain clips.
        while self.read_overlap_idx < self.overlaps.len()
            && read_pos >= self.overlaps[self.read_overlap_idx].start()
        {
            let ov = self.overlaps[self.read_overlap_idx];
            if read_pos < ov.end() {
                return self.composite_overlap(ov, read_pos);
            }
            self.read_overlap_idx += 1;
        }
        while self.read_clip_idx < self.clips.len()
            && read_pos >= self.clips[self.read_clip_idx].start()
        {
            let clip = &mut self.clips[self.read_clip_idx];
            if read_pos < clip.end() {
                let local = read_pos - clip.start();
                return clip.read_frame(local).unwrap_or_else(|e| {
                    log::warn!("track {}: clip {} read failed: {e}", self.id, clip.id());
                    VideoFrame::empty(read_pos)
                });
            }
            self.read_clip_idx += 1;
        }
        VideoFrame::empty(read_pos)
    }

    fn read_reverse_at(&mut self, read_pos: i64) -> VideoFrame {
        // Walk the overlap cursor backwards until it no longer starts after
        // the read position.
        while self.read_overlap_idx > 0
            && (self.read_overlap_idx >= self.overlaps.len()
                || read_pos < self.overlaps[self.read_overlap_idx].start())
        {
            self.read_overlap_idx -= 1;
        }
        if self.read_overlap_idx < self.overlaps.len() {
            let ov = self.overlaps[self.read_overlap_idx];
            if ov.contains(read_pos) {
                return self.composite_overlap(ov, read_pos);
            }
        }

        while self.read_clip_idx > 0
            && (self.read_clip_idx >= self.clips.len()
                || read_pos < self.clips[self.read_clip_idx].start())
        {
            self.read_clip_idx -= 1;
        }
        if self.read_clip_idx < self.clips.len() {
            let clip = &mut self.clips[self.read_clip_idx];
            if read_pos < clip.end() {
                let local = read_pos - clip.start();
                return clip.read_frame(local).unwrap_or_else(|e| {
                    log::warn!("track {}: clip {} read failed: {e}", self.id, clip.id());
                    VideoFrame::empty(read_pos)
                });
            }
        }
        VideoFrame::empty(read_pos)
    }

    /// Composite the overlap region by reading both member clips and blending
    /// them through the track's transition.
    fn composite_overlap(&mut self, ov: Overlap, read_pos: i64) -> VideoFrame {
        let front_idx = self.clips.iter().position(|c| c.id() == ov.front_id());
        let rear_idx = self.clips.iter().position(|c| c.id() == ov.rear_id());
        let (Some(fi), Some(ri)) = (front_idx, rear_idx) else {
            return VideoFrame::empty(read_pos);
        };

        let read_one = |clip: &mut Clip| -> VideoFrame {
            let local = read_pos - clip.start();
            clip.read_frame(local).unwrap_or_else(|e| {
                log::warn!("overlap read: clip {} failed: {e}", clip.id());
                VideoFrame::empty(read_pos)
            })
        };
        let (front_frame, rear_frame) = if fi < ri {
            let (a, b) = self.clips.split_at_mut(ri);
            (read_one(&mut a[fi]), read_one(&mut b[0]))
        } else {
            let (a, b) = self.clips.split_at_mut(fi);
            (read_one(&mut b[0]), read_one(&mut a[ri]))
        };

        let alpha = (read_pos - ov.start()) as f32 / ov.duration().max(1) as f32;
        self.transition.apply(&front_frame, &rear_frame, alpha)
    }

    // ── Validity & overlap maintenance ────────────────────────────────────────

    /// The triple-overlap rule: neither endpoint of `[start, end)` may fall
    /// strictly inside an overlap that does not involve `clip_id`.
    fn check_clip_range_valid(&self, clip_id: i64, start: i64, end: i64) -> bool {
        !self.overlaps.iter().any(|ov| {
            !ov.involves(clip_id)
                && ((start > ov.start() && start < ov.end())
                    || (end > ov.start() && end < ov.end()))
        })
    }

    /// Regenerate overlap records around the changed clip: refresh and drop
    /// stale ones, add records for every new intersection, resort.
    fn update_clip_overlap(&mut self, changed_id: i64) {
        // Refresh records involving the changed clip; drop records whose
        // intersection vanished or whose members left the track.
        let mut i = 0;
        while i < self.overlaps.len() {
            let ov = self.overlaps[i];
            let front = self.clips.iter().position(|c| c.id() == ov.front_id());
            let rear = self.clips.iter().position(|c| c.id() == ov.rear_id());
            match (front, rear) {
                (Some(f), Some(r)) => {
                    if ov.involves(changed_id) {
                        self.overlaps[i] = Overlap::new(ov.id(), &self.clips[f], &self.clips[r]);
                    }
                    if self.overlaps[i].duration() > 0 {
                        i += 1;
                    } else {
                        self.overlaps.remove(i);
                    }
                }
                // A member left the track - the record is stale.
                _ => {
                    self.overlaps.remove(i);
                }
            }
        }

        // Add a record for every other clip that now intersects the changed one.
        let mut fresh = Vec::new();
        if let Some(ci) = self.clips.iter().position(|c| c.id() == changed_id) {
            let changed = &self.clips[ci];
            for other in self.clips.iter().filter(|c| c.id() != changed_id) {
                let exists = self
                    .overlaps
                    .iter()
                    .any(|ov| ov.involves(changed_id) && ov.involves(other.id()));
                if !exists && Overlap::has_overlap(changed, other) {
                    fresh.push(Overlap::new(self.next_overlap_id + fresh.len() as i64, changed, other));
                }
            }
        }
        self.next_overlap_id += fresh.len() as i64;
        self.overlaps.extend(fresh);
        self.overlaps.sort_by_key(|ov| (ov.start(), ov.id()));
    }

    fn sort_clips(&mut self) {
        self.clips.sort_by_key(|c| (c.start(), c.id()));
    }

    /// Re-apply the current read position after a mutation so the cursors
    /// stay consistent with the new clip arrangement.
    fn reseek(&mut self) {
        let pos = self.frame_rate.pos_at_frame(self.read_frame_index).max(0);
        self.seek_to(pos).ok();
    }

    // ── JSON ──────────────────────────────────────────────────────────────────

    pub fn save_as_json(&self) -> Value {
        let clips: Vec<Value> = self.clips.iter().map(Clip::save_as_json).collect();
        json!({
            "id": self.id,
            "out_width": self.out_width,
            "out_height": self.out_height,
            "frame_rate": { "num": self.frame_rate.num, "den": self.frame_rate.den },
            "forward": self.forward,
            "clips": clips,
        })
    }

    pub fn load_from_json(
        json: &Value,
        host: HostEnv,
        factory: &dyn ClipSourceFactory,
    ) -> EngineResult<Self> {
        let id = json
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| EngineError::ParseFailed("track json: missing 'id'".into()))?;
        let out_width = json.get("out_width").and_then(Value::as_u64).unwrap_or(0) as u32;
        let out_height = json.get("out_height").and_then(Value::as_u64).unwrap_or(0) as u32;
        let rate = json
            .get("frame_rate")
            .ok_or_else(|| EngineError::ParseFailed("track json: missing 'frame_rate'".into()))?;
        let frame_rate = Ratio::new(
            rate.get("num").and_then(Value::as_i64).unwrap_or(25) as i32,
            rate.get("den").and_then(Value::as_i64).unwrap_or(1) as i32,
        );

        let mut track = Track::new(id, out_width, out_height, frame_rate);
        if let Some(forward) = json.get("forward").and_then(Value::as_bool) {
            track.forward = forward;
        }
        if let Some(clips) = json.get("clips").and_then(Value::as_array) {
            for clip_json in clips {
                let clip = Clip::load_from_json(clip_json, host.clone(), factory)?;
                track.insert_clip(clip)?;
            }
        }
        Ok(track)
    }
}
