// crates/mediacut-core/src/clip.rs
//
// A clip places a segment of a source media on a track's timeline.
// The decode side is behind the `ClipSource` seam - mediacut-media provides
// the stateful per-clip decoder; tests and gap rendering use `NullClipSource`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::frame::VideoFrame;
use crate::host::HostEnv;
use crate::stack::VideoEventStackFilter;

/// Immutable description of a source media file (the media-bin entry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceDesc {
    pub id:          Uuid,
    pub path:        PathBuf,
    /// Total source duration in milliseconds.
    pub duration:    i64,
    #[serde(default)]
    pub video_size:  Option<(u32, u32)>,
    #[serde(default)]
    pub has_audio:   bool,
}

/// The decode seam: something that can produce a frame at a source position.
///
/// Implementations own whatever decoder state they need; the clip translates
/// timeline positions into source positions before calling in.
pub trait ClipSource: Send {
    /// Position the reader at `src_pos_ms` (keyframe-aligned internally).
    fn seek(&mut self, src_pos_ms: i64);

    /// Prefetch hint: the track is about to read around `src_pos_ms`.
    fn notify_read_pos(&mut self, _src_pos_ms: i64) {}

    /// Decode the frame covering `src_pos_ms`.
    fn read_frame(&mut self, src_pos_ms: i64) -> EngineResult<VideoFrame>;
}

/// Reconstructs readers when a timeline is loaded from JSON.
pub trait ClipSourceFactory {
    fn open_reader(&self, desc: &SourceDesc) -> EngineResult<Box<dyn ClipSource>>;
}

/// A source that decodes nothing: solid frames at the requested position.
/// Stands in for offline media and drives the data-layer tests.
pub struct NullClipSource {
    pub width:  u32,
    pub height: u32,
    /// RGBA fill for every emitted frame.
    pub fill:   [u8; 4],
}

impl NullClipSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, fill: [0, 0, 0, 255] }
    }

    pub fn with_fill(width: u32, height: u32, fill: [u8; 4]) -> Self {
        Self { width, height, fill }
    }
}

impl ClipSource for NullClipSource {
    fn seek(&mut self, _src_pos_ms: i64) {}

    fn read_frame(&mut self, src_pos_ms: i64) -> EngineResult<VideoFrame> {
        let mut frame = VideoFrame::new(self.width, self.height, src_pos_ms);
        for px in frame.data.chunks_exact_mut(4) {
            px.copy_from_slice(&self.fill);
        }
        Ok(frame)
    }
}

pub struct Clip {
    id:           i64,
    source:       Arc<SourceDesc>,
    start:        i64,
    start_offset: i64,
    end_offset:   i64,
    forward:      bool,
    track_id:     Option<i64>,
    filter:       VideoEventStackFilter,
    reader:       Box<dyn ClipSource>,
}

impl Clip {
    /// Build a clip. Offsets must leave a positive duration inside the source.
    pub fn new(
        id: i64,
        source: Arc<SourceDesc>,
        start: i64,
        start_offset: i64,
        end_offset: i64,
        reader: Box<dyn ClipSource>,
        host: HostEnv,
    ) -> EngineResult<Self> {
        if start_offset < 0 || end_offset < 0 {
            return Err(EngineError::invalid_arg("clip offsets cannot be negative"));
        }
        if start_offset + end_offset >= source.duration {
            return Err(EngineError::invalid_arg(format!(
                "offsets {start_offset}+{end_offset} leave no duration in a {} ms source",
                source.duration
            )));
        }
        Ok(Self {
            id,
            source,
            start,
            start_offset,
            end_offset,
            forward: true,
            track_id: None,
            filter: VideoEventStackFilter::new(host),
            reader,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn source(&self) -> &Arc<SourceDesc> {
        &self.source
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn duration(&self) -> i64 {
        self.source.duration - self.start_offset - self.end_offset
    }

    pub fn end(&self) -> i64 {
        self.start + self.duration()
    }

    pub fn start_offset(&self) -> i64 {
        self.start_offset
    }

    pub fn end_offset(&self) -> i64 {
        self.end_offset
    }

    pub fn is_forward(&self) -> bool {
        self.forward
    }

    pub fn track_id(&self) -> Option<i64> {
        self.track_id
    }

    pub(crate) fn set_track_id(&mut self, track_id: Option<i64>) {
        self.track_id = track_id;
    }

    pub fn contains(&self, timeline_pos: i64) -> bool {
        timeline_pos >= self.start && timeline_pos < self.end()
    }

    pub fn filter(&self) -> &VideoEventStackFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut VideoEventStackFilter {
        &mut self.filter
    }

    /// Track-internal: reposition on the timeline (duration unchanged).
    pub(crate) fn set_start(&mut self, start: i64) {
        self.start = start;
    }

    pub(crate) fn set_direction(&mut self, forward: bool) {
        self.forward = forward;
    }

    /// Trim from the head. Out-of-range values clamp so `duration > 0`
    /// always holds; the source can never be over-read.
    pub fn change_start_offset(&mut self, start_offset: i64) {
        let max = self.source.duration - self.end_offset - 1;
        self.start_offset = start_offset.clamp(0, max);
    }

    /// Trim from the tail; same clamping rule as `change_start_offset`.
    pub fn change_end_offset(&mut self, end_offset: i64) {
        let max = self.source.duration - self.start_offset - 1;
        self.end_offset = end_offset.clamp(0, max);
    }

    /// Map a clip-relative position to a source position, honouring trim and
    /// play direction.
    pub fn map_to_source(&self, pos_in_clip: i64) -> i64 {
        if self.forward {
            self.start_offset + pos_in_clip
        } else {
            self.source.duration - self.end_offset - 1 - pos_in_clip
        }
    }

    pub fn seek_to(&mut self, pos_in_clip: i64) {
        if pos_in_clip >= 0 && pos_in_clip < self.duration() {
            let src = self.map_to_source(pos_in_clip);
            self.reader.seek(src);
        }
    }

    pub fn notify_read_pos(&mut self, pos_in_clip: i64) {
        if pos_in_clip >= 0 && pos_in_clip < self.duration() {
            let src = self.map_to_source(pos_in_clip);
            self.reader.notify_read_pos(src);
        }
    }

    /// Decode the source frame for `pos_in_clip` and run it through the
    /// clip's event stack.
    pub fn read_frame(&mut self, pos_in_clip: i64) -> EngineResult<VideoFrame> {
        if pos_in_clip < 0 || pos_in_clip >= self.duration() {
            return Ok(VideoFrame::empty(pos_in_clip));
        }
        let src = self.map_to_source(pos_in_clip);
        let frame = self.reader.read_frame(src)?;
        Ok(self.filter.filter_image(&frame, pos_in_clip))
    }

    // ── JSON ──────────────────────────────────────────────────────────────────

    pub fn save_as_json(&self) -> Value {
        json!({
            "id": self.id,
            "source": serde_json::to_value(self.source.as_ref())
                .expect("SourceDesc serialization is infallible"),
            "start": self.start,
            "start_offset": self.start_offset,
            "end_offset": self.end_offset,
            "forward": self.forward,
            "filter": self.filter.save_as_json(),
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
            .ok_or_else(|| EngineError::ParseFailed("clip json: missing 'id'".into()))?;
        let source: SourceDesc = serde_json::from_value(
            json.get("source")
                .cloned()
                .ok_or_else(|| EngineError::ParseFailed("clip json: missing 'source'".into()))?,
        )
        .map_err(|e| EngineError::ParseFailed(format!("clip json: bad source: {e}")))?;
        let source = Arc::new(source);
        let start = json.get("start").and_then(Value::as_i64).unwrap_or(0);
        let start_offset = json.get("start_offset").and_then(Value::as_i64).unwrap_or(0);
        let end_offset = json.get("end_offset").and_then(Value::as_i64).unwrap_or(0);
        let forward = json.get("forward").and_then(Value::as_bool).unwrap_or(true);

        let reader = factory.open_reader(&source)?;
        let mut clip = Clip::new(id, source, start, start_offset, end_offset, reader, host.clone())?;
        clip.forward = forward;
        if let Some(filter_json) = json.get("filter") {
            clip.filter = VideoEventStackFilter::load_from_json(host, filter_json)?;
        }
        Ok(clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(duration: i64) -> Arc<SourceDesc> {
        Arc::new(SourceDesc {
            id: Uuid::new_v4(),
            path: PathBuf::from("/dev/null"),
            duration,
            video_size: Some((64, 64)),
            has_audio: false,
        })
    }

    fn clip(start: i64, so: i64, eo: i64) -> Clip {
        Clip::new(
            1,
            source(1000),
            start,
            so,
            eo,
            Box::new(NullClipSource::new(64, 64)),
            HostEnv::inert(),
        )
        .unwrap()
    }

    #[test]
    fn duration_subtracts_both_offsets() {
        let c = clip(100, 50, 150);
        assert_eq!(c.duration(), 800);
        assert_eq!(c.end(), 900);
    }

    #[test]
    fn offsets_leaving_no_duration_rejected() {
        let err = Clip::new(
            1,
            source(100),
            0,
            60,
            40,
            Box::new(NullClipSource::new(4, 4)),
            HostEnv::inert(),
        );
        assert!(matches!(err, Err(EngineError::InvalidArg(_))));
    }

    #[test]
    fn change_offsets_clamp_into_source() {
        let mut c = clip(0, 0, 0);
        c.change_start_offset(-50); // negative clamps to 0
        assert_eq!(c.start_offset(), 0);
        c.change_end_offset(5000); // beyond the source clamps to duration-1
        assert_eq!(c.end_offset(), 999);
        assert!(c.duration() > 0);
    }

    #[test]
    fn source_mapping_respects_direction() {
        let mut c = clip(0, 100, 200); // usable source range [100, 800)
        assert_eq!(c.map_to_source(0), 100);
        assert_eq!(c.map_to_source(699), 799);
        c.set_direction(false);
        assert_eq!(c.map_to_source(0), 799);
        assert_eq!(c.map_to_source(699), 100);
    }

    #[test]
    fn out_of_range_read_yields_empty_frame() {
        let mut c = clip(0, 0, 0);
        let f = c.read_frame(5000).unwrap();
        assert!(f.is_empty());
    }

    #[test]
    fn json_round_trip_preserves_placement() {
        struct NullFactory;
        impl ClipSourceFactory for NullFactory {
            fn open_reader(&self, _desc: &SourceDesc) -> EngineResult<Box<dyn ClipSource>> {
                Ok(Box::new(NullClipSource::new(64, 64)))
            }
        }
        let mut c = clip(250, 10, 20);
        c.filter_mut().add_event(7, 0, 100, 0).unwrap();
        let json = c.save_as_json();
        let back = Clip::load_from_json(&json, HostEnv::inert(), &NullFactory).unwrap();
        assert_eq!(back.id(), 1);
        assert_eq!(back.start(), 250);
        assert_eq!(back.duration(), c.duration());
        assert_eq!(back.filter().len(), 1);
    }
}
