// crates/mediacut-media/src/source.rs
//
// Source probing and the stateful per-clip decoder behind the timeline's
// `ClipSource` seam. The decoder avoids re-open/seek every frame: sequential
// reads decode forward, small forward jumps burn through the GOP decode-only
// (no scale, no alloc), and only backward movement or a large jump resets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::media::Type;
use uuid::Uuid;

use mediacut_core::clip::{ClipSource, ClipSourceFactory, SourceDesc};
use mediacut_core::{EngineError, EngineResult, VideoFrame};

use crate::convert::{pts_to_ms, RgbaConverter};

/// Forward jumps beyond this reset the demuxer instead of burning through
/// every intermediate frame.
const MAX_FORWARD_BURN_MS: i64 = 2000;

// ── Probing ───────────────────────────────────────────────────────────────────

/// Open a container, inspect its streams, and build the immutable source
/// descriptor the timeline shares.
pub fn probe_source(path: &Path) -> EngineResult<Arc<SourceDesc>> {
    let ictx = input(&path).map_err(|e| {
        EngineError::FileInvalid(format!("'{}': {e}", path.display()))
    })?;

    let mut duration = ictx.duration(); // AV_TIME_BASE units
    let mut duration_ms = if duration > 0 { duration / 1000 } else { 0 };
    if duration_ms <= 0 {
        // Container did not report a duration - fall back to the best stream.
        if let Some(stream) = ictx
            .streams()
            .best(Type::Video)
            .or_else(|| ictx.streams().best(Type::Audio))
        {
            let tb = stream.time_base();
            duration = stream.duration();
            duration_ms = pts_to_ms(duration.max(0), tb.numerator(), tb.denominator());
        }
    }

    let video_size = ictx.streams().best(Type::Video).map(|stream| unsafe {
        let p = stream.parameters().as_ptr();
        ((*p).width as u32, (*p).height as u32)
    });
    let has_audio = ictx.streams().best(Type::Audio).is_some();

    log::debug!(
        "probed '{}': {duration_ms} ms, video {video_size:?}, audio {has_audio}",
        path.display()
    );
    Ok(Arc::new(SourceDesc {
        id: Uuid::new_v4(),
        path: path.to_path_buf(),
        duration: duration_ms,
        video_size,
        has_audio,
    }))
}

// ── Per-clip decoder ──────────────────────────────────────────────────────────

/// Stateful per-clip video decoder implementing `ClipSource`.
pub struct ClipDecoder {
    path:      PathBuf,
    ictx:      ffmpeg::format::context::Input,
    decoder:   ffmpeg::decoder::Video,
    video_idx: usize,
    tb_num:    i32,
    tb_den:    i32,
    out_w:     u32,
    out_h:     u32,
    converter: RgbaConverter,
    /// Timestamp (ms) of the last frame the decoder produced; the forward /
    /// backward reset decision keys off it.
    last_ms:   i64,
    /// Most recent successfully converted frame, returned again when the
    /// stream hits EOF before the requested position (end-of-clip reads).
    last_good: Option<VideoFrame>,
}

impl ClipDecoder {
    /// Open a decoder positioned at `start_ms`. `out_w`/`out_h` of 0 keep the
    /// native resolution.
    pub fn open(path: &Path, out_w: u32, out_h: u32, start_ms: i64) -> Result<Self> {
        let mut ictx = input(&path).with_context(|| format!("open '{}'", path.display()))?;
        let (video_idx, tb_num, tb_den) = {
            let stream = ictx
                .streams()
                .best(Type::Video)
                .ok_or_else(|| anyhow!("no video stream in '{}'", path.display()))?;
            let tb = stream.time_base();
            (stream.index(), tb.numerator(), tb.denominator())
        };

        // Backward seek: land on the keyframe at or before the target so the
        // PTS filter can discard pre-roll instead of missing frames.
        if start_ms > 0 {
            let seek_ts = start_ms * (ffmpeg::ffi::AV_TIME_BASE as i64 / 1000);
            if let Err(e) = ictx.seek(seek_ts, ..=seek_ts) {
                log::warn!("initial seek to {start_ms} ms failed ({e}); decoding from start");
            }
        }

        let dec_ctx = {
            let stream = ictx.stream(video_idx).expect("stream index just probed");
            ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .context("decoder context from stream parameters")?
        };
        let decoder = dec_ctx.decoder().video().context("open video decoder")?;

        Ok(Self {
            path: path.to_path_buf(),
            ictx,
            decoder,
            video_idx,
            tb_num,
            tb_den,
            out_w,
            out_h,
            converter: RgbaConverter::new(),
            last_ms: start_ms.saturating_sub(1),
            last_good: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seek the demuxer and flush decoder state; decoding resumes from the
    /// keyframe at or before `target_ms`.
    fn reset_to(&mut self, target_ms: i64) -> Result<()> {
        let seek_ts = target_ms.max(0) * (ffmpeg::ffi::AV_TIME_BASE as i64 / 1000);
        self.ictx
            .seek(seek_ts, ..=seek_ts)
            .with_context(|| format!("seek to {target_ms} ms"))?;
        self.decoder.flush();
        self.last_ms = target_ms.saturating_sub(1);
        Ok(())
    }

    /// Decode forward until a frame at or past `target_ms` appears, scaling
    /// only that one frame. Pre-target frames are decode-only (~4x cheaper),
    /// which is what makes the post-seek GOP burn-through fast.
    fn advance_to(&mut self, target_ms: i64) -> Result<Option<VideoFrame>> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();

        for (stream, packet) in self.ictx.packets().flatten() {
            if stream.index() != self.video_idx {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let ms = decoded
                    .pts()
                    .map(|pts| pts_to_ms(pts, self.tb_num, self.tb_den))
                    .unwrap_or(self.last_ms + 1);
                self.last_ms = ms;
                if ms < target_ms {
                    continue; // burn-through: decode-only, no scale, no alloc
                }
                let frame = self.converter.convert(&decoded, self.out_w, self.out_h, ms)?;
                self.last_good = Some(frame.clone());
                return Ok(Some(frame));
            }
        }

        // Demuxer EOF - drain the decoder before giving up.
        let _ = self.decoder.send_eof();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let ms = decoded
                .pts()
                .map(|pts| pts_to_ms(pts, self.tb_num, self.tb_den))
                .unwrap_or(self.last_ms + 1);
            self.last_ms = ms;
            if ms < target_ms {
                continue;
            }
            let frame = self.converter.convert(&decoded, self.out_w, self.out_h, ms)?;
            self.last_good = Some(frame.clone());
            return Ok(Some(frame));
        }
        Ok(None)
    }
}

impl ClipSource for ClipDecoder {
    fn seek(&mut self, src_pos_ms: i64) {
        if let Err(e) = self.reset_to(src_pos_ms) {
            log::warn!("clip decoder seek to {src_pos_ms} ms failed: {e}");
        }
    }

    fn read_frame(&mut self, src_pos_ms: i64) -> EngineResult<VideoFrame> {
        // Reset when moving backward (the demuxer only goes forward) or on a
        // jump too large to burn through frame by frame.
        if src_pos_ms <= self.last_ms || src_pos_ms > self.last_ms + MAX_FORWARD_BURN_MS {
            // A re-read of the position we just produced is the common scrub
            // case - serve it from the held frame instead of reopening.
            if let Some(last) = &self.last_good {
                if src_pos_ms >= last.time_stamp && src_pos_ms <= self.last_ms {
                    return Ok(last.clone());
                }
            }
            self.reset_to(src_pos_ms)
                .map_err(|e| EngineError::seek_failed(e.to_string()))?;
        }

        match self.advance_to(src_pos_ms) {
            Ok(Some(frame)) => Ok(frame),
            // EOF before the target (reading the final frame of a clip):
            // hold the last displayed frame rather than going black.
            Ok(None) => self
                .last_good
                .clone()
                .ok_or_else(|| EngineError::decode_failed(format!(
                    "no frame at {src_pos_ms} ms in '{}'",
                    self.path.display()
                ))),
            Err(e) => Err(EngineError::decode_failed(e.to_string())),
        }
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Opens `ClipDecoder`s scaled to the owning track's output size. This is
/// the `ClipSourceFactory` a timeline load uses to reconnect clips to media.
pub struct MediaSourceFactory {
    pub out_width:  u32,
    pub out_height: u32,
}

impl MediaSourceFactory {
    pub fn new(out_width: u32, out_height: u32) -> Self {
        Self { out_width, out_height }
    }
}

impl ClipSourceFactory for MediaSourceFactory {
    fn open_reader(&self, desc: &SourceDesc) -> EngineResult<Box<dyn ClipSource>> {
        let decoder = ClipDecoder::open(&desc.path, self.out_width, self.out_height, 0)
            .map_err(|e| EngineError::FileInvalid(e.to_string()))?;
        Ok(Box::new(decoder))
    }
}
