// crates/mediacut-core/tests/timeline.rs
//
// Cross-module scenarios: an executable blueprint double (luminance gain)
// driven by keypoint curves, masked application, and full project round-trips.
// Single-module behaviour lives in the #[cfg(test)] blocks next to the code.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use mediacut_core::clip::{Clip, ClipSource, ClipSourceFactory, NullClipSource, SourceDesc};
use mediacut_core::curves::{Ease, KeyPoint};
use mediacut_core::host::{builtin, Blueprint, BlueprintFactory, HostEnv};
use mediacut_core::{
    EngineResult, Project, Ratio, Track, VideoEventStackFilter, VideoFrame,
};

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Multiplies every RGB byte by the `gain` input. Stands in for a host
/// blueprint graph with one named scalar input.
struct GainBlueprint {
    json: Value,
    gain: f64,
}

impl Blueprint<VideoFrame> for GainBlueprint {
    fn is_valid(&self) -> bool {
        true
    }

    fn is_executable(&self) -> bool {
        true
    }

    fn set_input(&mut self, name: &str, value: f64) {
        if name == "gain" {
            self.gain = value;
        }
    }

    fn run(&mut self, input: &VideoFrame, output: &mut VideoFrame, _pos: i64, _length: i64) -> EngineResult<()> {
        *output = input.clone();
        for px in output.data.chunks_exact_mut(4) {
            for c in &mut px[..3] {
                *c = ((*c as f64) * self.gain).round().min(255.0) as u8;
            }
        }
        Ok(())
    }

    fn serialize(&self) -> Value {
        self.json.clone()
    }
}

struct GainFactory;

impl BlueprintFactory<VideoFrame> for GainFactory {
    fn new_filter(&self, json: &Value, _name: &str, _kind: &str) -> EngineResult<Box<dyn Blueprint<VideoFrame>>> {
        Ok(Box::new(GainBlueprint { json: json.clone(), gain: 1.0 }))
    }
}

fn gain_host() -> HostEnv {
    HostEnv::new(
        Arc::new(GainFactory),
        Arc::new(builtin::InertBlueprintFactory),
        Arc::new(builtin::RectMaskRenderer),
        Arc::new(builtin::AlphaBlender),
    )
}

fn grey_frame(w: u32, h: u32, value: u8) -> VideoFrame {
    let mut f = VideoFrame::new(w, h, 0);
    for px in f.data.chunks_exact_mut(4) {
        px.copy_from_slice(&[value, value, value, 255]);
    }
    f
}

fn add_gain_curve(stack: &mut VideoEventStackFilter, event_id: i64) {
    let curves = stack.event_mut(event_id).unwrap().curves_mut();
    let gain = curves.add_curve("gain", 1.0).unwrap();
    gain.set_point(KeyPoint { x: 0, value: 1.0, ease: Ease::Linear });
    gain.set_point(KeyPoint { x: 100, value: 2.0, ease: Ease::Linear });
}

// ── Event-stack scenarios ─────────────────────────────────────────────────────

#[test]
fn empty_stack_is_identity_at_any_position() {
    let mut stack = VideoEventStackFilter::new(gain_host());
    let frame = grey_frame(8, 8, 77);
    for pos in [0, 50, 10_000] {
        assert_eq!(stack.filter_image(&frame, pos).data, frame.data);
    }
}

#[test]
fn gain_curve_drives_blueprint_inside_event_range_only() {
    let mut stack = VideoEventStackFilter::new(gain_host());
    stack.add_event(1, 100, 200, 0).unwrap();
    add_gain_curve(&mut stack, 1);

    let frame = grey_frame(8, 8, 100);

    // pos 150 → curve x = 50 → gain 1.5 → 100 * 1.5 = 150.
    let mid = stack.filter_image(&frame, 150);
    assert_eq!(mid.pixel(3, 3)[0], 150);

    // Just before the event and at its (half-open) end: identity.
    assert_eq!(stack.filter_image(&frame, 99).data, frame.data);
    assert_eq!(stack.filter_image(&frame, 200).data, frame.data);
}

#[test]
fn event_masks_limit_the_blueprint_to_the_masked_region() {
    let host = gain_host();
    let mut stack = VideoEventStackFilter::new(host.clone());
    stack.add_event(1, 0, 100, 0).unwrap();
    {
        let curves = stack.event_mut(1).unwrap().curves_mut();
        curves.add_curve("gain", 2.0).unwrap(); // constant ×2
    }
    let rect = |x: u32, y: u32, w: u32, h: u32| {
        json!({
            "type": "rect", "x": x, "y": y, "w": w, "h": h,
            "alpha": 1.0, "canvas_w": 128, "canvas_h": 128
        })
    };
    let ev = stack.event_mut(1).unwrap();
    ev.save_mask(&host, rect(0, 0, 50, 50), None, -1).unwrap();
    ev.save_mask(&host, rect(40, 40, 80, 80), None, -1).unwrap();

    let frame = grey_frame(128, 128, 100);
    let out = stack.filter_image(&frame, 50);

    // Inside either rectangle: processed (×2). Outside both: original.
    assert_eq!(out.pixel(45, 45)[0], 200);
    assert_eq!(out.pixel(60, 60)[0], 200);
    assert_eq!(out.pixel(90, 0)[0], 100);
}

#[test]
fn stack_applies_every_effective_layer() {
    // Two gain events on different layers covering the same range. Only the
    // saturated result proves both ran in sequence.
    let mut stack = VideoEventStackFilter::new(gain_host());
    stack.add_event(1, 0, 100, 1).unwrap();
    stack.add_event(2, 0, 100, 0).unwrap();
    for id in [1, 2] {
        let curves = stack.event_mut(id).unwrap().curves_mut();
        curves.add_curve("gain", 2.0).unwrap();
    }
    let frame = grey_frame(4, 4, 70);
    let out = stack.filter_image(&frame, 10);
    // 70 ×2 = 140, ×2 = 280 → clamps at 255 only if both ran.
    assert_eq!(out.pixel(0, 0)[0], 255);
}

#[test]
fn filter_json_round_trip_preserves_blueprints_and_curves() {
    let mut stack = VideoEventStackFilter::new(gain_host());
    stack.add_event(1, 100, 200, 0).unwrap();
    add_gain_curve(&mut stack, 1);
    let json = stack.save_as_json();

    let mut restored = VideoEventStackFilter::load_from_json(gain_host(), &json).unwrap();
    assert_eq!(restored.save_as_json(), json);

    // The restored stack still computes the same output.
    let frame = grey_frame(8, 8, 100);
    assert_eq!(restored.filter_image(&frame, 150).pixel(0, 0)[0], 150);
}

// ── Timeline playback ─────────────────────────────────────────────────────────

struct NullFactory;

impl ClipSourceFactory for NullFactory {
    fn open_reader(&self, _desc: &SourceDesc) -> EngineResult<Box<dyn ClipSource>> {
        Ok(Box::new(NullClipSource::new(16, 16)))
    }
}

fn solid_clip(id: i64, start: i64, duration: i64, value: u8, host: HostEnv) -> Clip {
    let source = Arc::new(SourceDesc {
        id: Uuid::new_v4(),
        path: PathBuf::from(format!("/media/{id}.mp4")),
        duration,
        video_size: Some((16, 16)),
        has_audio: false,
    });
    Clip::new(
        id,
        source,
        start,
        0,
        0,
        Box::new(NullClipSource::with_fill(16, 16, [value, value, value, 255])),
        host,
    )
    .unwrap()
}

#[test]
fn clip_event_stack_shapes_track_output() {
    let host = gain_host();
    let mut track = Track::new(1, 16, 16, Ratio::new(25, 1));
    let mut clip = solid_clip(1, 0, 1000, 100, host.clone());
    clip.filter_mut().add_event(1, 100, 200, 0).unwrap();
    {
        let curves = clip.filter_mut().event_mut(1).unwrap().curves_mut();
        let gain = curves.add_curve("gain", 1.0).unwrap();
        gain.set_point(KeyPoint { x: 0, value: 1.0, ease: Ease::Linear });
        gain.set_point(KeyPoint { x: 100, value: 2.0, ease: Ease::Linear });
    }
    track.insert_clip(clip).unwrap();

    // Frame at 160 ms: inside the event, curve x = 60 → gain 1.6 → 160.
    track.seek_to(160).unwrap();
    let frame = track.read_frame();
    assert_eq!(frame.time_stamp, 160);
    assert_eq!(frame.pixel(8, 8)[0], 160);

    // Frame at 320 ms: outside the event, untouched.
    track.seek_to(320).unwrap();
    assert_eq!(track.read_frame().pixel(8, 8)[0], 100);
}

#[test]
fn sequential_reads_cover_clip_gap_and_overlap() {
    let host = gain_host();
    let mut track = Track::new(1, 16, 16, Ratio::new(25, 1));
    track.insert_clip(solid_clip(1, 0, 400, 200, host.clone())).unwrap();
    track.insert_clip(solid_clip(2, 300, 400, 0, host.clone())).unwrap(); // overlap [300, 400)
    track.insert_clip(solid_clip(3, 1000, 200, 50, host)).unwrap(); // gap [700, 1000)

    track.seek_to(0).unwrap();
    let mut last_ts = i64::MIN;
    let mut saw_gap = false;
    let mut saw_overlap_blend = false;
    for _ in 0..32 {
        let f = track.read_frame();
        assert!(f.time_stamp >= last_ts);
        last_ts = f.time_stamp;
        if f.is_empty() && (700..1000).contains(&f.time_stamp) {
            saw_gap = true;
        }
        if !f.is_empty() && (300..400).contains(&f.time_stamp) {
            let v = f.pixel(8, 8)[0];
            if v > 10 && v < 190 {
                saw_overlap_blend = true;
            }
        }
    }
    assert!(saw_gap, "gap between clips must yield empty frames");
    assert!(saw_overlap_blend, "overlap region must blend both clips");
}

// ── Project round-trip ────────────────────────────────────────────────────────

#[test]
fn project_round_trips_a_full_timeline() {
    let _ = env_logger::builder().is_test(true).try_init();
    let host = gain_host();
    let mut track = Track::new(1, 16, 16, Ratio::new(30, 1));
    let mut clip = solid_clip(1, 0, 1000, 100, host.clone());
    clip.filter_mut().add_event(5, 100, 200, 2).unwrap();
    add_gain_curve(clip.filter_mut(), 5);
    clip.filter_mut()
        .event_mut(5)
        .unwrap()
        .save_mask(
            &host,
            json!({
                "type": "rect", "x": 0, "y": 0, "w": 8, "h": 8,
                "alpha": 1.0, "canvas_w": 16, "canvas_h": 16
            }),
            None,
            -1,
        )
        .unwrap();
    track.insert_clip(clip).unwrap();
    track.insert_clip(solid_clip(2, 800, 600, 30, host.clone())).unwrap();

    let base = std::env::temp_dir().join(format!("mediacut-it-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&base).unwrap();

    let project = Project::new();
    project.create_new("roundtrip", &base).unwrap();
    project
        .set_content(json!({ "tracks": [ track.save_as_json() ] }))
        .unwrap();
    project.save().unwrap();
    let path = project.file_path().unwrap();
    project.close(false).unwrap();

    let loaded = Project::new();
    loaded.load(&path).unwrap();
    let content = loaded.content().unwrap();
    let restored =
        Track::load_from_json(&content["tracks"][0], host, &NullFactory).unwrap();

    assert_eq!(restored.clips().len(), 2);
    assert_eq!(restored.overlaps().len(), 1);
    assert_eq!(restored.duration(), track.duration());
    // Event ids, ranges, z, masks, blueprint and curve JSON all survive.
    assert_eq!(restored.save_as_json(), track.save_as_json());

    std::fs::remove_dir_all(base).ok();
}
