// crates/mediacut-core/src/host.rs
//
// The host environment: every collaborator the engine consumes but does not
// implement - blueprint graphs, mask creators, the frame blender - arrives
// here as an explicit value passed at construction time. There are no ambient
// callback pointers anywhere in the engine.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::frame::{AudioChunk, MaskFrame, VideoFrame};

// ── Blueprint (opaque dataflow graph) ─────────────────────────────────────────

/// A host-owned signal-processing graph with named scalar inputs and a single
/// frame-in / frame-out execution entry point.
///
/// `F` is the frame type the graph transforms (`VideoFrame` or `AudioChunk`).
pub trait Blueprint<F>: Send {
    /// The graph parsed without structural errors.
    fn is_valid(&self) -> bool;

    /// The graph can currently run. A valid but non-executable blueprint
    /// (e.g. no nodes yet) makes the owning event a pass-through.
    fn is_executable(&self) -> bool;

    /// Write a scalar input; unknown names are ignored by the host graph.
    fn set_input(&mut self, name: &str, value: f64);

    /// Transform `input` into `output`. `pos` is event-relative (ms) and
    /// `length` is the owning event's length (ms).
    fn run(&mut self, input: &F, output: &mut F, pos: i64, length: i64) -> EngineResult<()>;

    /// The graph's JSON document, stored verbatim in event JSON under `bp`.
    fn serialize(&self) -> Value;
}

/// Constructs blueprints from their serialized form.
pub trait BlueprintFactory<F>: Send + Sync {
    /// `name` tags the graph instance ("VideoEventBp"/"AudioEventBp");
    /// `kind` selects the node palette ("Video"/"Audio").
    fn new_filter(&self, json: &Value, name: &str, kind: &str) -> EngineResult<Box<dyn Blueprint<F>>>;
}

// ── Mask creator ──────────────────────────────────────────────────────────────

/// Render options forwarded to the host mask library.
#[derive(Clone, Copy, Debug)]
pub struct MaskRenderOptions {
    pub antialias: bool,
    pub inverted:  bool,
    pub scale_x:   f32,
    pub scale_y:   f32,
}

impl Default for MaskRenderOptions {
    fn default() -> Self {
        Self { antialias: true, inverted: true, scale_x: 1.0, scale_y: 1.0 }
    }
}

/// A parsed mask description that can be rasterized on demand.
pub trait MaskSource: Send {
    fn render(&self, opts: &MaskRenderOptions) -> MaskFrame;
}

/// Parses mask descriptor JSON into a `MaskSource`.
pub trait MaskRenderer: Send + Sync {
    fn from_json(&self, desc: &Value) -> EngineResult<Box<dyn MaskSource>>;
}

// ── Blender ───────────────────────────────────────────────────────────────────

/// Combines a processed frame with the original through a float alpha mask:
/// mask 1.0 keeps the processed pixel, 0.0 restores the original.
pub trait FrameBlender: Send + Sync {
    fn blend(&self, processed: &VideoFrame, original: &VideoFrame, mask: &MaskFrame) -> VideoFrame;
}

// ── Host environment ──────────────────────────────────────────────────────────

/// All collaborator entry points, bundled. Cloning shares the collaborators.
#[derive(Clone)]
pub struct HostEnv {
    pub video_blueprints: Arc<dyn BlueprintFactory<VideoFrame>>,
    pub audio_blueprints: Arc<dyn BlueprintFactory<AudioChunk>>,
    pub masks:            Arc<dyn MaskRenderer>,
    pub blender:          Arc<dyn FrameBlender>,
}

impl HostEnv {
    pub fn new(
        video_blueprints: Arc<dyn BlueprintFactory<VideoFrame>>,
        audio_blueprints: Arc<dyn BlueprintFactory<AudioChunk>>,
        masks: Arc<dyn MaskRenderer>,
        blender: Arc<dyn FrameBlender>,
    ) -> Self {
        Self { video_blueprints, audio_blueprints, masks, blender }
    }

    /// A host with inert blueprints and the built-in CPU mask/blend path.
    ///
    /// Events created under this host are pass-throughs until the embedding
    /// application installs real blueprint factories; masks and blending work
    /// in full. Used by tests and headless tools.
    pub fn inert() -> Self {
        Self {
            video_blueprints: Arc::new(builtin::InertBlueprintFactory),
            audio_blueprints: Arc::new(builtin::InertBlueprintFactory),
            masks:            Arc::new(builtin::RectMaskRenderer),
            blender:          Arc::new(builtin::AlphaBlender),
        }
    }
}

// ── Built-in collaborators ────────────────────────────────────────────────────

pub mod builtin {
    use super::*;

    /// Blueprint that stores its JSON and does nothing. `is_executable` is
    /// false, so the event stack passes frames through untouched.
    pub struct InertBlueprint {
        json: Value,
    }

    impl<F> Blueprint<F> for InertBlueprint {
        fn is_valid(&self) -> bool {
            true
        }

        fn is_executable(&self) -> bool {
            false
        }

        fn set_input(&mut self, _name: &str, _value: f64) {}

        fn run(&mut self, _input: &F, _output: &mut F, _pos: i64, _length: i64) -> EngineResult<()> {
            Ok(())
        }

        fn serialize(&self) -> Value {
            self.json.clone()
        }
    }

    pub struct InertBlueprintFactory;

    impl<F> BlueprintFactory<F> for InertBlueprintFactory {
        fn new_filter(&self, json: &Value, _name: &str, _kind: &str) -> EngineResult<Box<dyn Blueprint<F>>> {
            Ok(Box::new(InertBlueprint { json: json.clone() }))
        }
    }

    /// CPU alpha blend: `out = processed * a + original * (1 - a)` per channel.
    pub struct AlphaBlender;

    impl FrameBlender for AlphaBlender {
        fn blend(&self, processed: &VideoFrame, original: &VideoFrame, mask: &MaskFrame) -> VideoFrame {
            if processed.is_empty() || original.is_empty() {
                return processed.clone();
            }
            let mut out = processed.clone();
            let w = processed.width.min(mask.width) as usize;
            let h = processed.height.min(mask.height) as usize;
            let stride = processed.width as usize;
            for y in 0..h {
                for x in 0..w {
                    let a = mask.data[y * mask.width as usize + x].clamp(0.0, 1.0);
                    let i = (y * stride + x) * 4;
                    for c in 0..4 {
                        let p = processed.data[i + c] as f32;
                        let o = original.data[i + c] as f32;
                        out.data[i + c] = (p * a + o * (1.0 - a)).round() as u8;
                    }
                }
            }
            // Pixels outside the mask extent keep the processed value; mask
            // creators always rasterize at the full frame size in practice.
            out
        }
    }

    /// Minimal mask creator understanding axis-aligned rectangle descriptors:
    ///
    /// ```json
    /// { "type": "rect", "x": 0, "y": 0, "w": 50, "h": 50,
    ///   "alpha": 1.0, "canvas_w": 128, "canvas_h": 128 }
    /// ```
    ///
    /// Real deployments swap in the host mask library; this one keeps masks
    /// functional in tests and headless tools.
    pub struct RectMaskRenderer;

    #[derive(Clone, Copy)]
    struct RectMask {
        x:        u32,
        y:        u32,
        w:        u32,
        h:        u32,
        alpha:    f32,
        canvas_w: u32,
        canvas_h: u32,
    }

    impl MaskSource for RectMask {
        fn render(&self, opts: &MaskRenderOptions) -> MaskFrame {
            let w = ((self.canvas_w as f32) * opts.scale_x.max(0.0)).round() as u32;
            let h = ((self.canvas_h as f32) * opts.scale_y.max(0.0)).round() as u32;
            let (w, h) = (w.max(1), h.max(1));
            let mut mask = MaskFrame::new(w, h);
            let sx = w as f32 / self.canvas_w.max(1) as f32;
            let sy = h as f32 / self.canvas_h.max(1) as f32;
            let x0 = (self.x as f32 * sx) as u32;
            let y0 = (self.y as f32 * sy) as u32;
            let x1 = (((self.x + self.w) as f32) * sx).min(w as f32) as u32;
            let y1 = (((self.y + self.h) as f32) * sy).min(h as f32) as u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    mask.data[(y * w + x) as usize] = self.alpha;
                }
            }
            mask
        }
    }

    impl MaskRenderer for RectMaskRenderer {
        fn from_json(&self, desc: &Value) -> EngineResult<Box<dyn MaskSource>> {
            let kind = desc.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind != "rect" {
                return Err(EngineError::ParseFailed(format!(
                    "unsupported mask type '{kind}'"
                )));
            }
            let get = |key: &str| desc.get(key).and_then(Value::as_u64).unwrap_or(0) as u32;
            Ok(Box::new(RectMask {
                x:        get("x"),
                y:        get("y"),
                w:        get("w"),
                h:        get("h"),
                alpha:    desc.get("alpha").and_then(Value::as_f64).unwrap_or(1.0) as f32,
                canvas_w: get("canvas_w").max(1),
                canvas_h: get("canvas_h").max(1),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::builtin::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn rect_mask_renders_inside_and_outside() {
        let renderer = RectMaskRenderer;
        let src = renderer
            .from_json(&json!({
                "type": "rect", "x": 10, "y": 10, "w": 20, "h": 20,
                "alpha": 1.0, "canvas_w": 64, "canvas_h": 64
            }))
            .unwrap();
        let mask = src.render(&MaskRenderOptions::default());
        assert_eq!(mask.alpha_at(15, 15), 1.0);
        assert_eq!(mask.alpha_at(5, 5), 0.0);
        assert_eq!(mask.alpha_at(35, 15), 0.0);
    }

    #[test]
    fn unknown_mask_type_fails_parse() {
        let renderer = RectMaskRenderer;
        assert!(renderer.from_json(&json!({"type": "bezier"})).is_err());
    }

    #[test]
    fn alpha_blend_selects_by_mask() {
        let mut processed = VideoFrame::new(2, 1, 0);
        processed.data = vec![200; 8];
        let mut original = VideoFrame::new(2, 1, 0);
        original.data = vec![100; 8];
        let mut mask = MaskFrame::new(2, 1);
        mask.data = vec![1.0, 0.0];

        let out = AlphaBlender.blend(&processed, &original, &mask);
        assert_eq!(out.pixel(0, 0)[0], 200);
        assert_eq!(out.pixel(1, 0)[0], 100);
    }

    #[test]
    fn inert_blueprint_is_not_executable() {
        let factory = InertBlueprintFactory;
        let bp: Box<dyn Blueprint<VideoFrame>> =
            factory.new_filter(&json!({}), "VideoEventBp", "Video").unwrap();
        assert!(bp.is_valid());
        assert!(!bp.is_executable());
    }
}
