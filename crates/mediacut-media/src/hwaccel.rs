// crates/mediacut-media/src/hwaccel.rs
//
// Hardware decode setup. The codec library calls back with a list of
// candidate pixel formats; which one wins is a pure function supplied at
// pipeline construction, so policy stays out of the ffi glue.

use std::ffi::c_void;

use anyhow::{anyhow, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::ffi;
use ffmpeg::format::Pixel;

/// Pure format-selection hook: `candidates` is what the decoder offers,
/// `desired` is what the chosen hw config advertises.
pub type HwFormatChooser = fn(candidates: &[Pixel], desired: Pixel) -> Option<Pixel>;

/// Default policy: take the advertised format when offered, else give up
/// (the caller falls back to software decode).
pub fn default_hw_format_chooser(candidates: &[Pixel], desired: Pixel) -> Option<Pixel> {
    candidates.contains(&desired).then_some(desired)
}

/// State the `get_format` callback reads. Boxed and kept alive by the player
/// for as long as the decoder context exists - the codec context only holds
/// a raw pointer to it.
pub struct HwNegotiation {
    chooser: HwFormatChooser,
    desired: ffi::AVPixelFormat,
}

unsafe extern "C" fn hw_get_format(
    ctx: *mut ffi::AVCodecContext,
    list: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    let neg = &*((*ctx).opaque as *const HwNegotiation);
    let mut candidates = Vec::new();
    let mut p = list;
    while *p != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
        candidates.push(Pixel::from(*p));
        p = p.add(1);
    }
    match (neg.chooser)(&candidates, Pixel::from(neg.desired)) {
        Some(fmt) => fmt.into(),
        None => ffi::AVPixelFormat::AV_PIX_FMT_NONE,
    }
}

/// Attach a hardware device context and the format-negotiation callback to
/// a not-yet-opened decoder context.
///
/// Returns the negotiation state; the caller must keep the box alive until
/// the decoder is dropped. Fails when the codec has no hw-device config or
/// the device cannot be created - callers fall back to software decode.
pub fn setup_hw_decoder(
    dec_ctx: &mut ffmpeg::codec::context::Context,
    codec_id: ffmpeg::codec::Id,
    chooser: HwFormatChooser,
) -> Result<Box<HwNegotiation>> {
    unsafe {
        let codec = ffi::avcodec_find_decoder(codec_id.into());
        if codec.is_null() {
            return Err(anyhow!("no decoder for codec id {codec_id:?}"));
        }
        // Enumerate hw configs; take the first one usable through a device
        // context (the same walk the codec library documents).
        let mut chosen: Option<(ffi::AVHWDeviceType, ffi::AVPixelFormat)> = None;
        for i in 0.. {
            let config = ffi::avcodec_get_hw_config(codec, i);
            if config.is_null() {
                break;
            }
            let methods = (*config).methods as u32;
            if methods & ffi::AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as u32 != 0 {
                chosen = Some(((*config).device_type, (*config).pix_fmt));
                break;
            }
        }
        let (device_type, desired) = chosen
            .ok_or_else(|| anyhow!("decoder '{codec_id:?}' does not support hardware acceleration"))?;

        let mut device_ctx: *mut ffi::AVBufferRef = std::ptr::null_mut();
        let err = ffi::av_hwdevice_ctx_create(
            &mut device_ctx,
            device_type,
            std::ptr::null(),
            std::ptr::null_mut(),
            0,
        );
        if err < 0 {
            return Err(anyhow!("av_hwdevice_ctx_create returned {err}"));
        }

        let negotiation = Box::new(HwNegotiation { chooser, desired });
        let raw = dec_ctx.as_mut_ptr();
        // The codec context takes its own reference; ours is released here.
        (*raw).hw_device_ctx = ffi::av_buffer_ref(device_ctx);
        ffi::av_buffer_unref(&mut device_ctx);
        (*raw).get_format = Some(hw_get_format);
        (*raw).opaque = negotiation.as_ref() as *const HwNegotiation as *mut c_void;

        let type_name = ffi::av_hwdevice_get_type_name(device_type);
        if !type_name.is_null() {
            log::info!(
                "hw decode via '{}'",
                std::ffi::CStr::from_ptr(type_name).to_string_lossy()
            );
        }
        Ok(negotiation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chooser_takes_desired_when_offered() {
        let candidates = [Pixel::YUV420P, Pixel::VAAPI, Pixel::NV12];
        assert_eq!(
            default_hw_format_chooser(&candidates, Pixel::VAAPI),
            Some(Pixel::VAAPI)
        );
    }

    #[test]
    fn default_chooser_declines_when_absent() {
        let candidates = [Pixel::YUV420P, Pixel::NV12];
        assert_eq!(default_hw_format_chooser(&candidates, Pixel::CUDA), None);
    }
}
