// crates/mediacut-media/src/sink.rs
//
// The host audio output seam. The engine never pushes PCM - the sink pulls
// through a `ByteStream` whose reads also report playback progress, which is
// what makes the audio clock the master clock (player.rs).
//
// `RodioSink` is the built-in device implementation (rodio 0.21).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use mediacut_core::{EngineError, EngineResult};

/// Pull-based PCM source handed to the sink at `open_device` time.
///
/// `read` fills `buf` with interleaved samples and returns the byte count.
/// Non-blocking reads return what is immediately available (possibly 0);
/// blocking reads wait for data until the stream is reset or drained.
pub trait ByteStream: Send + Sync {
    fn read(&self, buf: &mut [u8], blocking: bool) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmFormat {
    S16,
}

/// Contract of the host audio device.
pub trait AudioSink: Send {
    fn open_device(
        &mut self,
        sample_rate: u32,
        channels: u16,
        format: PcmFormat,
        stream: Arc<dyn ByteStream>,
    ) -> EngineResult<()>;

    fn resume(&mut self);
    fn pause(&mut self);
    /// Drop device-side buffered audio. Stream-side state is reset by the
    /// engine separately.
    fn flush(&mut self);
    fn close_device(&mut self);
}

// ── rodio implementation ──────────────────────────────────────────────────────

/// Adapts a `ByteStream` into a rodio `Source`. Underruns emit silence so
/// the device never starves; the stream side decides what "no data" means.
struct PullSource {
    stream:   Arc<dyn ByteStream>,
    channels: u16,
    rate:     u32,
    buf:      Vec<u8>,
    filled:   usize,
    pos:      usize,
}

impl PullSource {
    fn new(stream: Arc<dyn ByteStream>, channels: u16, rate: u32) -> Self {
        Self { stream, channels, rate, buf: vec![0; 4096], filled: 0, pos: 0 }
    }
}

impl Iterator for PullSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos + 1 >= self.filled {
            self.filled = self.stream.read(&mut self.buf, false);
            self.pos = 0;
            if self.filled < 2 {
                return Some(0.0); // underrun → silence, keep the device fed
            }
        }
        let sample = i16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Some(sample as f32 / 32768.0)
    }
}

impl rodio::Source for PullSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> rodio::ChannelCount {
        self.channels
    }

    fn sample_rate(&self) -> rodio::SampleRate {
        self.rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Default device: a rodio output stream with one sink pulling the engine's
/// byte stream.
#[derive(Default)]
pub struct RodioSink {
    stream: Option<rodio::OutputStream>,
    sink:   Option<rodio::Sink>,
}

impl RodioSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for RodioSink {
    fn open_device(
        &mut self,
        sample_rate: u32,
        channels: u16,
        format: PcmFormat,
        stream: Arc<dyn ByteStream>,
    ) -> EngineResult<()> {
        debug_assert_eq!(format, PcmFormat::S16);
        let out = rodio::OutputStreamBuilder::open_default_stream()
            .context("open default audio output stream")
            .map_err(EngineError::Other)?;
        let sink = rodio::Sink::connect_new(out.mixer());
        sink.pause(); // opened paused; `resume` starts playback
        sink.append(PullSource::new(stream, channels, sample_rate));
        self.stream = Some(out);
        self.sink = Some(sink);
        log::debug!("audio device opened: {sample_rate} Hz, {channels} ch, S16");
        Ok(())
    }

    fn resume(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn flush(&mut self) {
        // The pull source reads live from the byte stream - there is no
        // device-side frame queue to drop beyond rodio's own small buffer.
    }

    fn close_device(&mut self) {
        self.sink = None;
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Feeds a fixed byte pattern, then reports exhaustion.
    struct FixedStream {
        data: Mutex<Vec<u8>>,
    }

    impl ByteStream for FixedStream {
        fn read(&self, buf: &mut [u8], _blocking: bool) -> usize {
            let mut data = self.data.lock().unwrap();
            let n = buf.len().min(data.len());
            buf[..n].copy_from_slice(&data[..n]);
            data.drain(..n);
            n
        }
    }

    #[test]
    fn pull_source_converts_s16_le_and_pads_with_silence() {
        let samples: Vec<u8> = [16384_i16, -16384]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let stream = Arc::new(FixedStream { data: Mutex::new(samples) });
        let mut src = PullSource::new(stream, 2, 44_100);
        assert_eq!(src.next(), Some(0.5));
        assert_eq!(src.next(), Some(-0.5));
        // Exhausted stream → silence, never None.
        assert_eq!(src.next(), Some(0.0));
        assert_eq!(src.next(), Some(0.0));
    }
}
