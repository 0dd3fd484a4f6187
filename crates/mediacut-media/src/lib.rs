// crates/mediacut-media/src/lib.rs
//
// Runtime layer: everything that touches FFmpeg, threads, or an audio device.
// No timeline types are defined here - mediacut-core owns the data model and
// this crate implements its decode-side seams (`ClipSource`, frame delivery).

pub mod cache;
pub mod convert;
pub mod hwaccel;
pub mod player;
pub mod queue;
pub mod sink;
pub mod source;

// Re-export the main public API so embedder imports stay shallow.
pub use cache::FrameCache;
pub use player::{MediaPlayer, PlayMode, PlayerConfig};
pub use queue::BoundedQueue;
pub use sink::{AudioSink, ByteStream, PcmFormat, RodioSink};
pub use source::{probe_source, ClipDecoder, MediaSourceFactory};
