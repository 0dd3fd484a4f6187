// crates/mediacut-core/src/stack.rs
//
// The event-stack filter: an ordered, non-overlapping-within-a-layer
// collection of events applied sequentially to a frame. Video and audio
// stacks share all structure; the per-frame transform and the mask/blender
// step are the only differences, expressed through `FilterKind` rather than
// an inheritance tree.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::frame::{AudioChunk, VideoFrame};
use crate::host::{BlueprintFactory, HostEnv};

/// The serialized filter name. Unknown names fail `load_from_json`.
pub const FILTER_NAME: &str = "EventStackFilter";

/// Capability set distinguishing the video and audio stacks.
pub trait FilterKind: Sized + 'static {
    type Frame: Clone;

    /// Blueprint instance tag and node palette handed to the factory.
    const BP_NAME: &'static str;
    const BP_KIND: &'static str;

    /// Whether event JSON carries mask arrays (video only).
    const INCLUDE_MASKS: bool;

    fn factory(host: &HostEnv) -> &Arc<dyn BlueprintFactory<Self::Frame>>;

    /// Apply one event to a frame at event-relative `pos`.
    fn apply_event(
        event: &mut Event<Self::Frame>,
        host: &HostEnv,
        frame: &Self::Frame,
        pos: i64,
        dur: i64,
    ) -> Self::Frame;
}

pub struct VideoKind;

impl FilterKind for VideoKind {
    type Frame = VideoFrame;

    const BP_NAME: &'static str = "VideoEventBp";
    const BP_KIND: &'static str = "Video";
    const INCLUDE_MASKS: bool = true;

    fn factory(host: &HostEnv) -> &Arc<dyn BlueprintFactory<VideoFrame>> {
        &host.video_blueprints
    }

    fn apply_event(
        event: &mut Event<VideoFrame>,
        host: &HostEnv,
        frame: &VideoFrame,
        pos: i64,
        _dur: i64,
    ) -> VideoFrame {
        if !event.blueprint().is_executable() {
            return frame.clone();
        }
        // Drive the blueprint's scalar inputs from the like-named curves.
        let inputs: Vec<(String, f64)> = (0..event.curves().curve_count())
            .filter_map(|i| {
                event
                    .curves()
                    .curve_name(i)
                    .map(|name| (name.to_string(), event.curves().value_by_index(i, pos)))
            })
            .collect();
        for (name, value) in inputs {
            event.blueprint_mut().set_input(&name, value);
        }

        let length = event.length();
        let mut out = frame.clone();
        if let Err(e) = event.blueprint_mut().run(frame, &mut out, pos, length) {
            log::warn!("event {}: blueprint run failed: {e}", event.id());
            return frame.clone();
        }
        if let Some(mask) = event.combined_mask() {
            out = host.blender.blend(&out, frame, &mask);
        }
        out
    }
}

pub struct AudioKind;

impl FilterKind for AudioKind {
    type Frame = AudioChunk;

    const BP_NAME: &'static str = "AudioEventBp";
    const BP_KIND: &'static str = "Audio";
    const INCLUDE_MASKS: bool = false;

    fn factory(host: &HostEnv) -> &Arc<dyn BlueprintFactory<AudioChunk>> {
        &host.audio_blueprints
    }

    fn apply_event(
        event: &mut Event<AudioChunk>,
        _host: &HostEnv,
        frame: &AudioChunk,
        pos: i64,
        _dur: i64,
    ) -> AudioChunk {
        if !event.blueprint().is_executable() {
            return frame.clone();
        }
        let inputs: Vec<(String, f64)> = (0..event.curves().curve_count())
            .filter_map(|i| {
                event
                    .curves()
                    .curve_name(i)
                    .map(|name| (name.to_string(), event.curves().value_by_index(i, pos)))
            })
            .collect();
        for (name, value) in inputs {
            event.blueprint_mut().set_input(&name, value);
        }
        let length = event.length();
        let mut out = frame.clone();
        if let Err(e) = event.blueprint_mut().run(frame, &mut out, pos, length) {
            log::warn!("event {}: blueprint run failed: {e}", event.id());
            return frame.clone();
        }
        out
    }
}

pub type VideoEventStackFilter = EventStackFilter<VideoKind>;
pub type AudioEventStackFilter = EventStackFilter<AudioKind>;

pub struct EventStackFilter<K: FilterKind> {
    host: HostEnv,
    /// Sorted by (z asc, start asc). No two events with equal z overlap.
    events: Vec<Event<K::Frame>>,
    editing_event_id: i64,
}

impl<K: FilterKind> EventStackFilter<K> {
    pub fn new(host: HostEnv) -> Self {
        Self { host, events: Vec::new(), editing_event_id: -1 }
    }

    pub fn filter_name(&self) -> &'static str {
        FILTER_NAME
    }

    pub fn host(&self) -> &HostEnv {
        &self.host
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event<K::Frame>] {
        &self.events
    }

    pub fn events_at_z(&self, z: i32) -> impl Iterator<Item = &Event<K::Frame>> + '_ {
        self.events.iter().filter(move |e| e.z() == z)
    }

    pub fn event(&self, id: i64) -> EngineResult<&Event<K::Frame>> {
        self.events
            .iter()
            .find(|e| e.id() == id)
            .ok_or_else(|| EngineError::not_found(format!("event with id {id}")))
    }

    pub fn event_mut(&mut self, id: i64) -> EngineResult<&mut Event<K::Frame>> {
        self.events
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or_else(|| EngineError::not_found(format!("event with id {id}")))
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    /// Create an event at `[start, end)` on layer `z`. Reversed ranges are
    /// swapped silently; `start == end`, duplicate ids, and same-layer
    /// overlaps are rejected without changing state.
    pub fn add_event(&mut self, id: i64, start: i64, end: i64, z: i32) -> EngineResult<&mut Event<K::Frame>> {
        if start == end {
            return Err(EngineError::invalid_arg("'start' and 'end' cannot be identical"));
        }
        if self.events.iter().any(|e| e.id() == id) {
            return Err(EngineError::already_exists(format!("event with id {id}")));
        }
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        if self.has_overlap(start, end, z, None) {
            return Err(EngineError::invalid_arg(
                "event range overlaps an existing event on the same layer",
            ));
        }
        let blueprint = K::factory(&self.host).new_filter(&json!({}), K::BP_NAME, K::BP_KIND)?;
        self.events.push(Event::new(id, start, end, z, blueprint));
        self.sort_events();
        Ok(self.events.iter_mut().find(|e| e.id() == id).unwrap())
    }

    pub fn remove_event(&mut self, id: i64) {
        if self.editing_event_id == id {
            self.editing_event_id = -1;
        }
        self.events.retain(|e| e.id() != id);
    }

    /// Resize an event in place. The curve x-range follows the new length.
    pub fn change_event_range(&mut self, id: i64, start: i64, end: i64) -> EngineResult<()> {
        if start == end {
            return Err(EngineError::invalid_arg("'start' and 'end' cannot be identical"));
        }
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        let z = self.event(id)?.z();
        if self.has_overlap(start, end, z, Some(id)) {
            return Err(EngineError::invalid_arg(
                "event range overlaps an existing event on the same layer",
            ));
        }
        self.event_mut(id)?.set_range(start, end);
        self.sort_events();
        Ok(())
    }

    /// Move an event to `start` on layer `z`, keeping its length.
    pub fn move_event(&mut self, id: i64, start: i64, z: i32) -> EngineResult<()> {
        let end = {
            let ev = self.event(id)?;
            ev.end() + (start - ev.start())
        };
        if self.has_overlap(start, end, z, Some(id)) {
            return Err(EngineError::invalid_arg(
                "event range overlaps an existing event on the same layer",
            ));
        }
        self.event_mut(id)?.set_position(start, z);
        self.sort_events();
        Ok(())
    }

    /// Shift every event by `offset` ms. Relative order cannot change, so no
    /// overlap re-validation is needed.
    pub fn move_all_events(&mut self, offset: i64) {
        for ev in &mut self.events {
            let start = ev.start() + offset;
            let z = ev.z();
            ev.set_position(start, z);
        }
    }

    pub fn set_editing_event(&mut self, id: i64) -> EngineResult<()> {
        if id != -1 {
            self.event(id)?;
        }
        self.editing_event_id = id;
        Ok(())
    }

    pub fn editing_event(&self) -> Option<&Event<K::Frame>> {
        self.events.iter().find(|e| e.id() == self.editing_event_id)
    }

    // ── Apply ─────────────────────────────────────────────────────────────────

    /// Apply every effective event at `pos` in stack order. `dur` is the
    /// frame duration (audio); the video path ignores it.
    pub fn apply_at(&mut self, frame: &K::Frame, pos: i64, dur: i64) -> K::Frame {
        let host = self.host.clone();
        let mut out = frame.clone();
        for ev in self.events.iter_mut().filter(|e| e.contains(pos)) {
            let local = pos - ev.start();
            out = K::apply_event(ev, &host, &out, local, dur);
        }
        out
    }

    // ── JSON ──────────────────────────────────────────────────────────────────

    pub fn save_as_json(&self) -> Value {
        let events: Vec<Value> = self.events.iter().map(|e| e.save_as_json(K::INCLUDE_MASKS)).collect();
        json!({ "name": FILTER_NAME, "events": events })
    }

    /// Restore a stack from JSON. The `name` field must match; every event
    /// is re-validated on enroll, so a corrupt file cannot produce a stack
    /// that violates the overlap invariant.
    pub fn load_from_json(host: HostEnv, json: &Value) -> EngineResult<Self> {
        let name = json
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::ParseFailed("filter json: missing 'name'".into()))?;
        if name != FILTER_NAME {
            return Err(EngineError::ParseFailed(format!("unknown filter name '{name}'")));
        }
        let mut stack = Self::new(host);
        if let Some(events) = json.get("events").and_then(Value::as_array) {
            for event_json in events {
                stack.restore_event_from_json(event_json)?;
            }
        }
        Ok(stack)
    }

    /// Parse and enroll one event (used by both `load_from_json` and the
    /// editor's paste path).
    pub fn restore_event_from_json(&mut self, event_json: &Value) -> EngineResult<&mut Event<K::Frame>> {
        let event = Event::load_from_json(
            event_json,
            K::factory(&self.host).as_ref(),
            &self.host,
            K::BP_NAME,
            K::BP_KIND,
            K::INCLUDE_MASKS,
        )?;
        self.enroll_event(event)
    }

    /// Admit an already-built event, enforcing the id and overlap invariants.
    pub fn enroll_event(&mut self, event: Event<K::Frame>) -> EngineResult<&mut Event<K::Frame>> {
        if self.events.iter().any(|e| e.id() == event.id()) {
            return Err(EngineError::already_exists(format!("event with id {}", event.id())));
        }
        if self.has_overlap(event.start(), event.end(), event.z(), None) {
            return Err(EngineError::invalid_arg(
                "enrolled event overlaps an existing event on the same layer",
            ));
        }
        let id = event.id();
        self.events.push(event);
        self.sort_events();
        Ok(self.events.iter_mut().find(|e| e.id() == id).unwrap())
    }

    /// Deep copy through the JSON representation (the only complete clone -
    /// blueprints are host objects and only round-trip via their documents).
    pub fn clone_via_json(&self) -> EngineResult<Self> {
        Self::load_from_json(self.host.clone(), &self.save_as_json())
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Strict interval overlap on one layer:
    /// `!(a.end <= b.start || b.end <= a.start)`.
    fn has_overlap(&self, start: i64, end: i64, z: i32, exclude_id: Option<i64>) -> bool {
        self.events.iter().any(|e| {
            e.z() == z
                && Some(e.id()) != exclude_id
                && !(end <= e.start() || e.end() <= start)
        })
    }

    fn sort_events(&mut self) {
        self.events.sort_by_key(|e| (e.z(), e.start(), e.id()));
    }
}

impl VideoEventStackFilter {
    /// Apply the stack to a video frame at clip-relative `pos`.
    pub fn filter_image(&mut self, frame: &VideoFrame, pos: i64) -> VideoFrame {
        self.apply_at(frame, pos, 0)
    }
}

impl AudioEventStackFilter {
    /// Apply the stack to a PCM chunk at clip-relative `pos` of length `dur`.
    pub fn filter_pcm(&mut self, chunk: &AudioChunk, pos: i64, dur: i64) -> AudioChunk {
        self.apply_at(chunk, pos, dur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> VideoEventStackFilter {
        VideoEventStackFilter::new(HostEnv::inert())
    }

    #[test]
    fn empty_stack_passes_frame_through() {
        let mut s = stack();
        let mut frame = VideoFrame::new(4, 4, 0);
        frame.data[0] = 123;
        let out = s.filter_image(&frame, 50);
        assert_eq!(out.data, frame.data);
    }

    #[test]
    fn reversed_range_is_swapped() {
        let mut s = stack();
        s.add_event(1, 200, 100, 0).unwrap();
        let ev = s.event(1).unwrap();
        assert_eq!((ev.start(), ev.end()), (100, 200));
    }

    #[test]
    fn zero_length_event_rejected() {
        let mut s = stack();
        assert!(matches!(s.add_event(1, 50, 50, 0), Err(EngineError::InvalidArg(_))));
        assert!(s.is_empty());
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut s = stack();
        s.add_event(1, 0, 100, 0).unwrap();
        assert!(matches!(s.add_event(1, 200, 300, 1), Err(EngineError::AlreadyExists(_))));
    }

    #[test]
    fn same_layer_overlap_rejected_other_layer_allowed() {
        let mut s = stack();
        s.add_event(1, 0, 100, 0).unwrap();
        s.add_event(2, 100, 200, 0).unwrap(); // half-open: touching is fine
        assert!(matches!(s.add_event(3, 50, 150, 0), Err(EngineError::InvalidArg(_))));
        assert_eq!(s.len(), 2);
        s.add_event(3, 50, 150, 1).unwrap();
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn move_event_revalidates() {
        let mut s = stack();
        s.add_event(1, 0, 100, 0).unwrap();
        s.add_event(2, 200, 300, 0).unwrap();
        assert!(s.move_event(2, 50, 0).is_err());
        // State unchanged on failure.
        assert_eq!(s.event(2).unwrap().start(), 200);
        s.move_event(2, 100, 0).unwrap();
        assert_eq!(s.event(2).unwrap().start(), 100);
    }

    #[test]
    fn change_range_updates_curve_span() {
        let mut s = stack();
        s.add_event(1, 0, 100, 0).unwrap();
        s.change_event_range(1, 0, 250).unwrap();
        let ev = s.event(1).unwrap();
        assert_eq!(ev.curves().max_x, 250);
    }

    #[test]
    fn events_sort_by_z_then_start() {
        let mut s = stack();
        s.add_event(10, 50, 100, 1).unwrap();
        s.add_event(11, 0, 40, 0).unwrap();
        s.add_event(12, 40, 90, 0).unwrap();
        let order: Vec<i64> = s.events().iter().map(|e| e.id()).collect();
        assert_eq!(order, vec![11, 12, 10]);
    }

    #[test]
    fn move_all_events_shifts_everything() {
        let mut s = stack();
        s.add_event(1, 0, 100, 0).unwrap();
        s.add_event(2, 100, 200, 0).unwrap();
        s.move_all_events(50);
        assert_eq!(s.event(1).unwrap().start(), 50);
        assert_eq!(s.event(2).unwrap().end(), 250);
    }

    #[test]
    fn editing_event_tracks_removal() {
        let mut s = stack();
        s.add_event(1, 0, 100, 0).unwrap();
        s.set_editing_event(1).unwrap();
        assert_eq!(s.editing_event().unwrap().id(), 1);
        s.remove_event(1);
        assert!(s.editing_event().is_none());
        assert!(s.set_editing_event(7).is_err());
    }

    #[test]
    fn json_round_trip_preserves_stack() {
        let mut s = stack();
        s.add_event(1, 0, 100, 0).unwrap();
        s.add_event(2, 50, 150, 1).unwrap();
        let json = s.save_as_json();
        let restored = VideoEventStackFilter::load_from_json(HostEnv::inert(), &json).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.save_as_json(), json);
    }

    #[test]
    fn load_rejects_unknown_filter_name() {
        let json = json!({ "name": "SomethingElse", "events": [] });
        assert!(VideoEventStackFilter::load_from_json(HostEnv::inert(), &json).is_err());
    }

    #[test]
    fn audio_stack_shares_structure_and_passes_pcm_through() {
        let mut s = AudioEventStackFilter::new(HostEnv::inert());
        s.add_event(1, 0, 100, 0).unwrap();
        assert!(matches!(s.add_event(2, 50, 150, 0), Err(EngineError::InvalidArg(_))));
        let chunk = AudioChunk {
            channels: 2,
            sample_rate: 48_000,
            data: vec![5; 96],
            time_stamp: 10,
            duration: 1,
        };
        // Inert blueprint → pass-through, no masks or blender on the audio side.
        let out = s.filter_pcm(&chunk, 10, 1);
        assert_eq!(out.data, chunk.data);
        let json = s.save_as_json();
        assert!(json["events"][0].get("event_masks").is_none());
    }

    #[test]
    fn load_rejects_corrupt_event_overlap() {
        // Hand-built JSON with two overlapping events on the same layer must
        // fail on enroll even though each event parses individually.
        let mut s = stack();
        s.add_event(1, 0, 100, 0).unwrap();
        let mut ev_json = s.save_as_json()["events"][0].clone();
        let mut json = s.save_as_json();
        ev_json["id"] = json!(2);
        ev_json["start"] = json!(50);
        ev_json["end"] = json!(150);
        json["events"].as_array_mut().unwrap().push(ev_json);
        assert!(VideoEventStackFilter::load_from_json(HostEnv::inert(), &json).is_err());
    }
}
