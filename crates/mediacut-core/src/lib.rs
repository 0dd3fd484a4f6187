// crates/mediacut-core/src/lib.rs
//
// Pure timeline data layer - no FFmpeg, no threads, no device handles.
// Everything here is plain data plus the host-environment seams the runtime
// layer (mediacut-media) and the embedding application plug into.
//
// To add a new timeline capability:
//   1. Create a new module file here
//   2. Add `pub mod mymodule;` below
//   3. Wire it into Track / Project as needed

pub mod clip;
pub mod curves;
pub mod error;
pub mod event;
pub mod frame;
pub mod host;
pub mod overlap;
pub mod project;
pub mod stack;
pub mod time;
pub mod track;
pub mod transitions;

// Re-export the main public API so downstream imports stay shallow.
pub use clip::{Clip, ClipSource, ClipSourceFactory, NullClipSource, SourceDesc};
pub use curves::{Curve, Ease, KeyPoint, KeyPointSet};
pub use error::{EngineError, EngineResult};
pub use event::Event;
pub use frame::{AudioChunk, ColorRange, ColorSpace, MaskFrame, PixelClass, VideoFrame};
pub use host::{Blueprint, BlueprintFactory, FrameBlender, HostEnv, MaskRenderer, MaskSource};
pub use overlap::Overlap;
pub use project::Project;
pub use stack::{AudioEventStackFilter, EventStackFilter, FilterKind, VideoEventStackFilter};
pub use time::Ratio;
pub use track::Track;
