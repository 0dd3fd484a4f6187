// crates/mediacut-media/src/convert.rs
//
// AVFrame → normalized RGBA matrix conversion, plus PNG export of a rendered
// frame. The scaler is cached on the source (format, dims) key - it only
// needs re-creating when the source changes, and its lookup-table init
// dominates construction cost.

use std::path::Path;

use anyhow::{anyhow, Context as _, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video as AvVideoFrame;

use mediacut_core::{ColorRange, ColorSpace, PixelClass, VideoFrame};

// ── Timestamp rescaling ───────────────────────────────────────────────────────

/// Rescale a PTS in `num/den` time base to milliseconds.
pub fn pts_to_ms(pts: i64, tb_num: i32, tb_den: i32) -> i64 {
    (pts as i128 * tb_num as i128 * 1000 / tb_den.max(1) as i128) as i64
}

/// Rescale milliseconds to a PTS in `num/den` time base.
pub fn ms_to_pts(ms: i64, tb_num: i32, tb_den: i32) -> i64 {
    (ms as i128 * tb_den as i128 / (tb_num.max(1) as i128 * 1000)) as i64
}

// ── Color metadata mapping ────────────────────────────────────────────────────

fn map_color_space(space: ffmpeg::color::Space) -> ColorSpace {
    use ffmpeg::color::Space;
    match space {
        Space::BT470BG | Space::SMPTE170M => ColorSpace::Bt601,
        Space::BT2020NCL | Space::BT2020CL => ColorSpace::Bt2020,
        _ => ColorSpace::Bt709,
    }
}

fn map_color_range(range: ffmpeg::color::Range) -> ColorRange {
    match range {
        ffmpeg::color::Range::JPEG => ColorRange::Full,
        _ => ColorRange::Narrow,
    }
}

fn map_pixel_class(format: Pixel) -> PixelClass {
    match format {
        Pixel::YUV420P | Pixel::YUVJ420P | Pixel::YUV420P10LE | Pixel::YUV420P12LE => {
            PixelClass::Yuv420
        }
        Pixel::YUV422P | Pixel::YUVJ422P | Pixel::YUV422P10LE => PixelClass::Yuv422,
        Pixel::YUV444P | Pixel::YUVJ444P | Pixel::YUV444P10LE => PixelClass::Yuv444,
        Pixel::NV12 | Pixel::NV21 | Pixel::P010LE | Pixel::P016LE => PixelClass::Nv12,
        Pixel::RGB24 | Pixel::RGBA | Pixel::BGRA | Pixel::BGR24 => PixelClass::Rgb,
        _ => PixelClass::Yuv420,
    }
}

/// True when the frame's pixel format lives in device memory.
fn is_hw_frame(format: Pixel) -> bool {
    unsafe {
        let desc = ffmpeg::ffi::av_pix_fmt_desc_get(format.into());
        if desc.is_null() {
            return false;
        }
        ((*desc).flags & ffmpeg::ffi::AV_PIX_FMT_FLAG_HWACCEL as u64) != 0
    }
}

// ── Converter ─────────────────────────────────────────────────────────────────

/// Stateful AVFrame → RGBA converter. Owns one cached scaler and a reusable
/// output buffer so steady-state conversion makes exactly one allocation
/// (the returned frame).
#[derive(Default)]
pub struct RgbaConverter {
    /// (scaler, src fmt, src w, src h, out w, out h) - the reuse key.
    scaler:    Option<(SwsContext, Pixel, u32, u32, u32, u32)>,
    frame_buf: Vec<u8>,
}

impl RgbaConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a decoded frame to packed RGBA at `out_w × out_h` (0 = native
    /// size). Hardware frames are transferred to system memory first.
    pub fn convert(
        &mut self,
        frame: &AvVideoFrame,
        out_w: u32,
        out_h: u32,
        time_stamp: i64,
    ) -> Result<VideoFrame> {
        let mut sw_holder;
        let src: &AvVideoFrame = if is_hw_frame(frame.format()) {
            sw_holder = AvVideoFrame::empty();
            unsafe {
                let err = ffmpeg::ffi::av_hwframe_transfer_data(
                    sw_holder.as_mut_ptr(),
                    frame.as_ptr(),
                    0,
                );
                if err < 0 {
                    return Err(anyhow!("av_hwframe_transfer_data returned {err}"));
                }
            }
            &sw_holder
        } else {
            frame
        };

        let (src_fmt, src_w, src_h) = (src.format(), src.width(), src.height());
        let (out_w, out_h) = if out_w == 0 || out_h == 0 {
            (src_w.max(2) & !1, src_h.max(2) & !1)
        } else {
            (out_w, out_h)
        };

        // Reuse the cached SwsContext when the conversion key is unchanged.
        let rebuild = !matches!(
            &self.scaler,
            Some((_, f, w, h, ow, oh))
                if *f == src_fmt && *w == src_w && *h == src_h && *ow == out_w && *oh == out_h
        );
        if rebuild {
            let sws = SwsContext::get(src_fmt, src_w, src_h, Pixel::RGBA, out_w, out_h, Flags::BILINEAR)
                .context("create RGBA scaler")?;
            self.scaler = Some((sws, src_fmt, src_w, src_h, out_w, out_h));
        }
        let (sws, ..) = self.scaler.as_mut().unwrap();

        let mut rgba = AvVideoFrame::empty();
        sws.run(src, &mut rgba).context("scale frame to RGBA")?;

        // Destripe: copy only visible pixels, not stride padding.
        let stride = rgba.stride(0);
        let raw = rgba.data(0);
        let row_bytes = out_w as usize * 4;
        self.frame_buf.clear();
        self.frame_buf.reserve(row_bytes * out_h as usize);
        for row in 0..out_h as usize {
            let s = row * stride;
            self.frame_buf.extend_from_slice(&raw[s..s + row_bytes]);
        }

        Ok(VideoFrame {
            width: out_w,
            height: out_h,
            data: self.frame_buf.clone(),
            color_space: map_color_space(frame.color_space()),
            color_range: map_color_range(frame.color_range()),
            pixel_class: map_pixel_class(src_fmt),
            is_key: frame.is_key(),
            time_stamp,
        })
    }
}

// ── PNG export ────────────────────────────────────────────────────────────────

/// Write a rendered frame to disk as an RGBA PNG.
pub fn save_frame_png(frame: &VideoFrame, dest: &Path) -> Result<()> {
    if frame.is_empty() {
        return Err(anyhow!("cannot save an empty frame"));
    }
    let file = std::fs::File::create(dest)
        .with_context(|| format!("create '{}'", dest.display()))?;
    let w = &mut std::io::BufWriter::new(file);
    let mut encoder = png::Encoder::new(w, frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().context("write PNG header")?;
    writer.write_image_data(&frame.data).context("write PNG data")?;
    log::debug!("PNG saved -> {}", dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_rescaling_round_trips_on_common_time_bases() {
        // 90 kHz MPEG time base.
        assert_eq!(pts_to_ms(90_000, 1, 90_000), 1000);
        assert_eq!(ms_to_pts(1000, 1, 90_000), 90_000);
        // 1/1000 is the identity.
        assert_eq!(pts_to_ms(1234, 1, 1000), 1234);
        assert_eq!(ms_to_pts(1234, 1, 1000), 1234);
    }

    #[test]
    fn pts_rescaling_survives_large_values() {
        let big = 1_i64 << 50;
        assert_eq!(pts_to_ms(big, 1, 90_000) / 1000, big / 90_000);
    }

    #[test]
    fn png_save_rejects_empty_frames() {
        let empty = VideoFrame::empty(0);
        assert!(save_frame_png(&empty, Path::new("/tmp/never-written.png")).is_err());
    }
}
