// crates/mediacut-media/src/player.rs
//
// The multi-stage decode pipeline: Demux → VideoDecode / AudioDecode →
// Resample → Render, each a long-lived thread connected by the bounded
// queues in queue.rs. Supports forward play, pause, full seek (optionally
// snapping to the next keyframe), and scrubbing-mode async seek backed by
// the frame cache in cache.rs.
//
// Thread ownership: the demuxer and decoder contexts are *moved into* their
// stage threads and handed back through the JoinHandle when the stage stops.
// Seek is therefore `quit + join + flush + relaunch` - between runs the
// control side owns every context and can flush it safely.
//
// Errors inside a stage never cross the thread boundary as values: the stage
// terminates, records the message on the shared error slot, and subsequent
// render attempts produce nothing.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::format::sample::{Sample, Type as SampleType};
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::util::frame::audio::Audio as AvAudioFrame;
use ffmpeg::util::frame::video::Video as AvVideoFrame;

use mediacut_core::time::format_millis;
use mediacut_core::{EngineError, EngineResult, VideoFrame};

use crate::cache::FrameCache;
use crate::convert::{ms_to_pts, pts_to_ms, RgbaConverter};
use crate::hwaccel::{default_hw_format_chooser, setup_hw_decoder, HwFormatChooser, HwNegotiation};
use crate::queue::{BoundedQueue, IDLE_POLL};
use crate::sink::{AudioSink, ByteStream, PcmFormat};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayMode {
    #[default]
    Normal,
    VideoOnly,
    AudioOnly,
}

#[derive(Clone, Copy)]
pub struct PlayerConfig {
    pub play_mode:         PlayMode,
    pub prefer_hw_decoder: bool,
    pub hw_format_chooser: HwFormatChooser,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            play_mode:         PlayMode::Normal,
            prefer_hw_decoder: true,
            hw_format_chooser: default_hw_format_chooser,
        }
    }
}

/// Seconds of video packets the demux queue buffers ahead.
const VID_PKT_Q_DURATION_SECS: f64 = 2.0;
const VID_PKT_Q_MIN: usize = 20;
const AUD_PKT_Q_MAX: usize = 64;
const VID_FRM_Q_MAX: usize = 4;
const AUD_FRM_Q_MAX: usize = 5;
/// Seconds of resampled audio to buffer; the queue cap follows the measured
/// average frame duration (updated by the audio decode stage).
const AUD_Q_DURATION_SECS: f64 = 0.5;
/// 1024 samples per frame @ 48 kHz over 0.5 s - the initial cap before the
/// rolling average settles.
const SWR_FRM_Q_MAX: usize = 24;
/// Rolling-average window for the audio frame duration.
const AUD_FRM_AVG_WINDOW: f64 = 10.0;

// ── Shared stage state ────────────────────────────────────────────────────────

struct Shared {
    quit:       AtomicBool,
    is_playing: AtomicBool,
    err:        Mutex<String>,

    vid_pkt_q: BoundedQueue<ffmpeg::Packet>,
    aud_pkt_q: BoundedQueue<ffmpeg::Packet>,
    vid_frm_q: BoundedQueue<AvVideoFrame>,
    aud_frm_q: BoundedQueue<AvAudioFrame>,
    swr_frm_q: BoundedQueue<AvAudioFrame>,

    demux_eof:  AtomicBool,
    viddec_eof: AtomicBool,
    auddec_eof: AtomicBool,
    swr_eof:    AtomicBool,
    render_eof: AtomicBool,

    after_seek: AtomicBool,
    seek_to_i:  AtomicBool,
    seek_to_ms: AtomicI64,
    /// Scrub target; `i64::MIN` means "no target yet".
    async_seek_pos: AtomicI64,

    play_pos:   AtomicI64,
    pos_offset: AtomicI64,
    paused_dur: AtomicI64,
    run_start:  Mutex<Option<Instant>>,

    audio_ms:         AtomicI64,
    audio_offset:     AtomicI64,
    audio_offset_set: AtomicBool,

    /// Rolling average audio frame duration in seconds.
    avg_aud_frm_dur: Mutex<f64>,

    /// Latest rendered frame - a separate, cloned handle with its own
    /// lifetime, never a frame still owned by a queue.
    video_out: Mutex<Option<VideoFrame>>,
    /// Lossy tap of rendered frames for pull-style consumers; `try_send`
    /// drops frames when the receiver lags instead of stalling the renderer.
    frame_tx: crossbeam_channel::Sender<VideoFrame>,

    vid_idx: Option<usize>,
    aud_idx: Option<usize>,
    vid_tb:  (i32, i32),
    aud_tb:  (i32, i32),
}

impl Shared {
    fn has_video(&self) -> bool {
        self.vid_idx.is_some()
    }

    fn has_audio(&self) -> bool {
        self.aud_idx.is_some()
    }

    fn quitting(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    fn set_err(&self, msg: String) {
        log::error!("{msg}");
        *self.err.lock().unwrap() = msg;
    }
}

// ── Audio byte stream (the sink pull side) ────────────────────────────────────

/// Feeds the audio sink from the resampled-frame queue and reports playback
/// progress. The timestamp of the most recent PCM handed out *is* the audio
/// clock; `audio_offset` is derived from the first frame after each flush,
/// never persisted.
struct AudioByteStream {
    shared:       Arc<Shared>,
    out_channels: u16,
    partial:      Mutex<Option<(AvAudioFrame, usize)>>,
}

impl AudioByteStream {
    fn new(shared: Arc<Shared>, out_channels: u16) -> Self {
        Self { shared, out_channels, partial: Mutex::new(None) }
    }

    fn frame_bytes(&self, frame: &AvAudioFrame) -> usize {
        frame.samples() * self.out_channels as usize * 2 // packed S16
    }

    fn reset(&self) {
        *self.partial.lock().unwrap() = None;
        self.shared.audio_offset_set.store(false, Ordering::Release);
    }
}

impl ByteStream for AudioByteStream {
    fn read(&self, buf: &mut [u8], blocking: bool) -> usize {
        let mut loaded = 0;

        // Leftover from the previous read first.
        {
            let mut partial = self.partial.lock().unwrap();
            if let Some((frame, consumed)) = partial.as_mut() {
                let total = self.frame_bytes(frame);
                let n = (total - *consumed).min(buf.len());
                buf[..n].copy_from_slice(&frame.data(0)[*consumed..*consumed + n]);
                *consumed += n;
                loaded += n;
                if *consumed >= total {
                    *partial = None;
                }
            }
        }

        let mut ts_update: Option<i64> = None;
        while loaded < buf.len() && !self.shared.quitting() {
            match self.shared.swr_frm_q.pop_if_available() {
                Some(frame) => {
                    let (tbn, tbd) = self.shared.aud_tb;
                    ts_update = Some(pts_to_ms(frame.pts().unwrap_or(0), tbn, tbd));
                    let total = self.frame_bytes(&frame);
                    let n = (buf.len() - loaded).min(total);
                    buf[loaded..loaded + n].copy_from_slice(&frame.data(0)[..n]);
                    loaded += n;
                    if n < total {
                        *self.partial.lock().unwrap() = Some((frame, n));
                    }
                }
                None => {
                    if self.shared.auddec_eof.load(Ordering::Acquire) || !blocking {
                        break;
                    }
                    thread::sleep(IDLE_POLL);
                }
            }
        }

        if let Some(ms) = ts_update {
            if !self.shared.audio_offset_set.swap(true, Ordering::AcqRel) {
                self.shared.audio_offset.store(ms, Ordering::Release);
            }
            self.shared.audio_ms.store(ms, Ordering::Release);
        }
        loaded
    }
}

// ── Player ────────────────────────────────────────────────────────────────────

pub struct MediaPlayer {
    cfg: PlayerConfig,

    ictx:        Option<ffmpeg::format::context::Input>,
    vid_decoder: Option<ffmpeg::decoder::Video>,
    aud_decoder: Option<ffmpeg::decoder::Audio>,
    /// `Some(None)` = audio present, pass-through (no conversion needed).
    swr_ctx:      Option<Option<resampling::Context>>,
    swr_out_rate: u32,
    swr_out_channels: u16,
    /// Keeps the hw `get_format` state alive while the decoder exists.
    hw_negotiation: Option<Box<HwNegotiation>>,

    shared:      Option<Arc<Shared>>,
    byte_stream: Option<Arc<AudioByteStream>>,
    sink:        Option<Box<dyn AudioSink>>,
    frame_rx:    Option<crossbeam_channel::Receiver<VideoFrame>>,

    demux_h:  Option<JoinHandle<ffmpeg::format::context::Input>>,
    viddec_h: Option<JoinHandle<ffmpeg::decoder::Video>>,
    auddec_h: Option<JoinHandle<ffmpeg::decoder::Audio>>,
    swr_h:    Option<JoinHandle<Option<resampling::Context>>>,
    render_h: Option<JoinHandle<()>>,

    is_playing:          bool,
    is_seeking:          bool,
    playing_before_seek: bool,
    pause_start:         Option<Instant>,
    err:                 String,
}

impl Default for MediaPlayer {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl MediaPlayer {
    pub fn new(cfg: PlayerConfig) -> Self {
        Self {
            cfg,
            ictx: None,
            vid_decoder: None,
            aud_decoder: None,
            swr_ctx: None,
            swr_out_rate: 0,
            swr_out_channels: 0,
            hw_negotiation: None,
            shared: None,
            byte_stream: None,
            sink: None,
            frame_rx: None,
            demux_h: None,
            viddec_h: None,
            auddec_h: None,
            swr_h: None,
            render_h: None,
            is_playing: false,
            is_seeking: false,
            playing_before_seek: false,
            pause_start: None,
            err: String::new(),
        }
    }

    /// Install the audio output device. Rejected while playing.
    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink>) -> EngineResult<()> {
        if self.is_playing {
            return Err(EngineError::invalid_arg(
                "cannot set the audio sink while the player is playing",
            ));
        }
        self.sink = Some(sink);
        Ok(())
    }

    /// Play mode can only change while no media is opened.
    pub fn set_play_mode(&mut self, mode: PlayMode) -> EngineResult<()> {
        if self.is_opened() {
            return Err(EngineError::invalid_arg(
                "play mode can only change when no media is opened",
            ));
        }
        self.cfg.play_mode = mode;
        Ok(())
    }

    pub fn set_prefer_hw_decoder(&mut self, prefer: bool) {
        self.cfg.prefer_hw_decoder = prefer;
    }

    pub fn is_opened(&self) -> bool {
        self.ictx.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_seeking(&self) -> bool {
        self.is_seeking
    }

    pub fn has_video(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.has_video())
    }

    pub fn has_audio(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.has_audio())
    }

    /// Media duration in milliseconds (0 when unknown).
    pub fn duration(&self) -> i64 {
        self.ictx
            .as_ref()
            .map(|c| (c.duration() / 1000).max(0))
            .unwrap_or(0)
    }

    /// The current play head in milliseconds.
    pub fn play_pos(&self) -> i64 {
        self.shared
            .as_ref()
            .map(|s| s.play_pos.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Latest rendered frame (cloned handle; safe to hold across seeks).
    pub fn video_frame(&self) -> Option<VideoFrame> {
        self.shared
            .as_ref()
            .and_then(|s| s.video_out.lock().unwrap().clone())
    }

    /// The most recent failure message, empty when healthy.
    pub fn error(&self) -> String {
        if let Some(shared) = &self.shared {
            let err = shared.err.lock().unwrap();
            if !err.is_empty() {
                return err.clone();
            }
        }
        self.err.clone()
    }

    // ── Open / close ──────────────────────────────────────────────────────────

    pub fn open(&mut self, path: &std::path::Path) -> EngineResult<()> {
        if self.is_opened() {
            self.close();
        }
        if let Err(e) = self.open_media(path) {
            self.err = e.to_string();
            self.close();
            return Err(e);
        }
        Ok(())
    }

    fn open_media(&mut self, path: &std::path::Path) -> EngineResult<()> {
        let ictx = input(&path)
            .map_err(|e| EngineError::FileInvalid(format!("'{}': {e}", path.display())))?;
        log::info!(
            "opened '{}': {} streams",
            path.display(),
            ictx.streams().count()
        );

        let vid_stream = if self.cfg.play_mode != PlayMode::AudioOnly {
            ictx.streams().best(MediaType::Video)
        } else {
            None
        };
        let aud_stream = if self.cfg.play_mode != PlayMode::VideoOnly {
            ictx.streams().best(MediaType::Audio)
        } else {
            None
        };
        if vid_stream.is_none() && aud_stream.is_none() {
            return Err(EngineError::FileInvalid(format!(
                "neither video nor audio stream found in '{}'",
                path.display()
            )));
        }

        let mut vid_idx = None;
        let mut vid_tb = (1, 1000);
        let mut vid_pkt_q_max = VID_PKT_Q_MIN;
        if let Some(stream) = &vid_stream {
            vid_idx = Some(stream.index());
            let tb = stream.time_base();
            vid_tb = (tb.numerator(), tb.denominator());
            let rate = stream.avg_frame_rate();
            if rate.denominator() > 0 {
                let per_sec = rate.numerator() as f64 / rate.denominator() as f64;
                vid_pkt_q_max = ((VID_PKT_Q_DURATION_SECS * per_sec) as usize).max(VID_PKT_Q_MIN);
            }
        }
        let mut aud_idx = None;
        let mut aud_tb = (1, 1000);
        if let Some(stream) = &aud_stream {
            aud_idx = Some(stream.index());
            let tb = stream.time_base();
            aud_tb = (tb.numerator(), tb.denominator());
        }

        // Decoders are built from stream parameters; the contexts live on the
        // control side between runs and move into the stage threads while
        // playing.
        if let Some(stream) = &vid_stream {
            let mut dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| EngineError::decode_failed(format!("video decoder context: {e}")))?;
            let mut threading = ffmpeg::codec::threading::Config::default();
            threading.kind = ffmpeg::codec::threading::Type::Frame;
            threading.count = 8;
            dec_ctx.set_threading(threading);

            if self.cfg.prefer_hw_decoder {
                match setup_hw_decoder(&mut dec_ctx, stream.parameters().id(), self.cfg.hw_format_chooser) {
                    Ok(negotiation) => self.hw_negotiation = Some(negotiation),
                    Err(e) => {
                        log::warn!("hw decode unavailable ({e}); using software decode");
                    }
                }
            }
            let decoder = dec_ctx
                .decoder()
                .video()
                .map_err(|e| EngineError::decode_failed(format!("open video decoder: {e}")))?;
            self.vid_decoder = Some(decoder);
        }

        if let Some(stream) = &aud_stream {
            let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| EngineError::decode_failed(format!("audio decoder context: {e}")))?;
            let decoder = dec_ctx
                .decoder()
                .audio()
                .map_err(|e| EngineError::decode_failed(format!("open audio decoder: {e}")))?;

            // Render format: packed S16, down-mix >2ch to stereo, native rate.
            let in_fmt = decoder.format();
            let in_rate = decoder.rate();
            let in_layout = decoder.ch_layout();
            let in_channels = in_layout.channels();
            let out_channels: u16 = if in_channels > 2 { 2 } else { in_channels as u16 };
            let out_layout = if out_channels == 1 {
                ChannelLayout::MONO
            } else {
                ChannelLayout::STEREO
            };
            let out_fmt = Sample::I16(SampleType::Packed);

            let pass_through = in_fmt == out_fmt && in_channels as u16 == out_channels;
            let swr = if pass_through {
                None
            } else {
                let src_layout = if in_channels >= 2 { in_layout } else { ChannelLayout::MONO };
                Some(
                    resampling::Context::get2(in_fmt, src_layout, in_rate, out_fmt, out_layout, in_rate)
                        .map_err(|e| EngineError::decode_failed(format!("create resampler: {e}")))?,
                )
            };
            self.aud_decoder = Some(decoder);
            self.swr_ctx = Some(swr);
            self.swr_out_rate = in_rate;
            self.swr_out_channels = out_channels;
        }

        // ~1 s of lookahead headroom for consumers that pull every frame.
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(32);
        let shared = Arc::new(Shared {
            quit:       AtomicBool::new(false),
            is_playing: AtomicBool::new(false),
            err:        Mutex::new(String::new()),
            vid_pkt_q:  BoundedQueue::new(vid_pkt_q_max),
            aud_pkt_q:  BoundedQueue::new(AUD_PKT_Q_MAX),
            vid_frm_q:  BoundedQueue::new(VID_FRM_Q_MAX),
            aud_frm_q:  BoundedQueue::new(AUD_FRM_Q_MAX),
            swr_frm_q:  BoundedQueue::new(SWR_FRM_Q_MAX),
            demux_eof:  AtomicBool::new(false),
            viddec_eof: AtomicBool::new(false),
            auddec_eof: AtomicBool::new(false),
            swr_eof:    AtomicBool::new(false),
            render_eof: AtomicBool::new(false),
            after_seek: AtomicBool::new(false),
            seek_to_i:  AtomicBool::new(false),
            seek_to_ms: AtomicI64::new(0),
            async_seek_pos: AtomicI64::new(i64::MIN),
            play_pos:   AtomicI64::new(0),
            pos_offset: AtomicI64::new(0),
            paused_dur: AtomicI64::new(0),
            run_start:  Mutex::new(None),
            audio_ms:         AtomicI64::new(0),
            audio_offset:     AtomicI64::new(0),
            audio_offset_set: AtomicBool::new(false),
            avg_aud_frm_dur:  Mutex::new(0.021),
            video_out: Mutex::new(None),
            frame_tx,
            vid_idx,
            aud_idx,
            vid_tb,
            aud_tb,
        });

        if shared.has_audio() {
            let byte_stream = Arc::new(AudioByteStream::new(shared.clone(), self.swr_out_channels));
            if let Some(sink) = &mut self.sink {
                sink.open_device(
                    self.swr_out_rate,
                    self.swr_out_channels,
                    PcmFormat::S16,
                    byte_stream.clone(),
                )?;
            }
            self.byte_stream = Some(byte_stream);
        }

        self.shared = Some(shared);
        self.frame_rx = Some(frame_rx);
        self.ictx = Some(ictx);
        Ok(())
    }

    /// Channel of rendered frames, in presentation order. The tap is lossy:
    /// a lagging consumer misses frames, the latest is always available via
    /// `video_frame`.
    pub fn frame_receiver(&self) -> Option<crossbeam_channel::Receiver<VideoFrame>> {
        self.frame_rx.clone()
    }

    pub fn close(&mut self) {
        self.stop_threads();
        if let Some(shared) = &self.shared {
            shared.vid_pkt_q.flush();
            shared.aud_pkt_q.flush();
            shared.vid_frm_q.flush();
            shared.aud_frm_q.flush();
            shared.swr_frm_q.flush();
        }
        if let Some(sink) = &mut self.sink {
            sink.close_device();
        }
        self.byte_stream = None;
        self.frame_rx = None;
        // The decoder holds the raw pointer into the negotiation box - drop
        // the decoder first.
        self.vid_decoder = None;
        self.hw_negotiation = None;
        self.aud_decoder = None;
        self.swr_ctx = None;
        self.ictx = None;
        self.shared = None;
        self.is_playing = false;
        self.is_seeking = false;
        self.pause_start = None;
        self.err.clear();
    }

    // ── Play / pause / reset ──────────────────────────────────────────────────

    pub fn play(&mut self) -> EngineResult<()> {
        if self.is_playing {
            return Ok(());
        }
        let Some(shared) = self.shared.clone() else {
            return Err(EngineError::NotOpened);
        };
        if !shared.has_video() && !shared.has_audio() {
            return Err(EngineError::invalid_arg("neither video nor audio is selected"));
        }
        if shared.render_eof.load(Ordering::Acquire) {
            self.reset()?;
        }

        if !shared.has_audio() {
            // Wall-clock mode: pauses accumulate into paused_dur.
            let mut run_start = shared.run_start.lock().unwrap();
            if run_start.is_none() {
                *run_start = Some(Instant::now());
            }
            if let Some(pause_start) = self.pause_start.take() {
                shared
                    .paused_dur
                    .fetch_add(pause_start.elapsed().as_millis() as i64, Ordering::AcqRel);
            }
        }

        if self.demux_h.is_none() {
            self.start_threads(false);
        }
        if let Some(sink) = &mut self.sink {
            sink.resume();
        }
        self.is_playing = true;
        if let Some(shared) = &self.shared {
            shared.is_playing.store(true, Ordering::Release);
        }
        Ok(())
    }

    pub fn pause(&mut self) -> EngineResult<()> {
        let Some(shared) = &self.shared else {
            return Err(EngineError::NotOpened);
        };
        if let Some(sink) = &mut self.sink {
            sink.pause();
        }
        if !shared.has_audio() {
            self.pause_start = Some(Instant::now());
        }
        self.is_playing = false;
        shared.is_playing.store(false, Ordering::Release);
        Ok(())
    }

    /// Stop everything and seek back to the container start.
    pub fn reset(&mut self) -> EngineResult<()> {
        if !self.is_opened() {
            return Err(EngineError::NotOpened);
        }
        if let Some(sink) = &mut self.sink {
            sink.pause();
        }
        self.stop_threads();
        self.flush_all();
        if let Some(sink) = &mut self.sink {
            sink.flush();
        }
        self.flush_decoders();

        let shared = self.shared.as_ref().expect("opened player has shared state");
        *shared.run_start.lock().unwrap() = None;
        shared.pos_offset.store(0, Ordering::Release);
        shared.paused_dur.store(0, Ordering::Release);
        shared.play_pos.store(0, Ordering::Release);
        shared.audio_ms.store(0, Ordering::Release);
        shared.audio_offset.store(0, Ordering::Release);
        shared.after_seek.store(false, Ordering::Release);
        self.pause_start = None;

        let ictx = self.ictx.as_mut().expect("opened player has a format context");
        let start = unsafe { (*ictx.as_ptr()).start_time };
        let err = unsafe {
            ffmpeg::ffi::avformat_seek_file(ictx.as_mut_ptr(), -1, i64::MIN, start, start, 0)
        };
        if err < 0 {
            let msg = format!("seek to container start failed ({err})");
            self.err = msg.clone();
            return Err(EngineError::seek_failed(msg));
        }
        Ok(())
    }

    // ── Seek ──────────────────────────────────────────────────────────────────

    /// Full synchronous seek to `pos` ms. With `seek_to_i`, the effective
    /// target snaps to the first keyframe decoded after the demuxer seek.
    pub fn seek(&mut self, pos: i64, seek_to_i: bool) -> EngineResult<()> {
        if !self.is_opened() {
            return Err(EngineError::NotOpened);
        }
        let was_playing = self.is_playing;

        if let Some(sink) = &mut self.sink {
            sink.pause();
        }
        self.stop_threads();
        self.flush_all();
        if let Some(sink) = &mut self.sink {
            sink.flush();
        }
        self.flush_decoders();

        let shared = self.shared.as_ref().expect("opened player has shared state");
        shared.after_seek.store(true, Ordering::Release);
        shared.seek_to_i.store(seek_to_i, Ordering::Release);
        shared.seek_to_ms.store(pos, Ordering::Release);
        self.pause_start = None;

        let ictx = self.ictx.as_mut().expect("opened player has a format context");
        let ts = pos * (ffmpeg::ffi::AV_TIME_BASE as i64 / 1000);
        let err = unsafe {
            ffmpeg::ffi::avformat_seek_file(ictx.as_mut_ptr(), -1, i64::MIN, ts, ts, 0)
        };
        if err < 0 {
            // Playback stays paused; the player is stopped but defined.
            let msg = format!("seek to {} failed ({err})", format_millis(pos));
            self.err = msg.clone();
            return Err(EngineError::seek_failed(msg));
        }
        log::debug!("seek to {}", format_millis(pos));

        if was_playing {
            self.start_threads(false);
            if let Some(sink) = &mut self.sink {
                sink.resume();
            }
            self.is_playing = true;
            if let Some(shared) = &self.shared {
                shared.is_playing.store(true, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Enter (or retarget) scrubbing mode. The first call swaps the pipeline
    /// over to the async-seek stage variants; later calls just publish the
    /// new target atomically.
    pub fn seek_async(&mut self, pos: i64) -> EngineResult<()> {
        if !self.is_opened() {
            return Err(EngineError::NotOpened);
        }
        if !self.is_seeking {
            self.playing_before_seek = self.is_playing;
            if let Some(sink) = &mut self.sink {
                sink.pause();
            }
            self.stop_threads();
            self.flush_all();
            if let Some(sink) = &mut self.sink {
                sink.flush();
            }
            self.flush_decoders();

            let shared = self.shared.as_ref().expect("opened player has shared state");
            shared.async_seek_pos.store(i64::MIN, Ordering::Release);
            self.start_threads(true);
            self.is_seeking = true;
        }
        let shared = self.shared.as_ref().expect("opened player has shared state");
        shared.async_seek_pos.store(pos, Ordering::Release);
        log::debug!("seek(async) to {}", format_millis(pos));
        Ok(())
    }

    /// Leave scrubbing mode: one final synchronous seek to the last target,
    /// then resume normal playback if the player was playing before.
    pub fn quit_seek_async(&mut self) -> EngineResult<()> {
        if !self.is_opened() {
            return Err(EngineError::NotOpened);
        }
        if !self.is_seeking {
            return Ok(());
        }
        self.stop_threads();
        self.flush_all();
        self.flush_decoders();

        let shared = self.shared.as_ref().expect("opened player has shared state");
        let target = shared.async_seek_pos.load(Ordering::Acquire);
        let ictx = self.ictx.as_mut().expect("opened player has a format context");
        let ts = if target == i64::MIN {
            unsafe { (*ictx.as_ptr()).start_time }
        } else {
            target * (ffmpeg::ffi::AV_TIME_BASE as i64 / 1000)
        };
        let err = unsafe {
            ffmpeg::ffi::avformat_seek_file(ictx.as_mut_ptr(), -1, i64::MIN, ts, ts, 0)
        };
        if err < 0 {
            let msg = format!("final scrub seek failed ({err})");
            self.err = msg.clone();
            self.is_seeking = false;
            return Err(EngineError::seek_failed(msg));
        }
        shared.after_seek.store(true, Ordering::Release);
        shared.seek_to_i.store(false, Ordering::Release);
        shared
            .seek_to_ms
            .store(if target == i64::MIN { 0 } else { target }, Ordering::Release);
        log::debug!("leave scrubbing at {}", format_millis(target.max(0)));

        if self.playing_before_seek {
            self.start_threads(false);
            if let Some(sink) = &mut self.sink {
                sink.resume();
            }
            self.is_playing = true;
            if let Some(shared) = &self.shared {
                shared.is_playing.store(true, Ordering::Release);
            }
        }
        self.is_seeking = false;
        Ok(())
    }

    // ── Thread lifecycle ──────────────────────────────────────────────────────

    fn start_threads(&mut self, async_mode: bool) {
        let shared = self.shared.clone().expect("start_threads requires an open player");
        shared.quit.store(false, Ordering::Release);

        let ictx = self.ictx.take().expect("format context present between runs");
        self.demux_h = Some(if async_mode {
            let s = shared.clone();
            thread::spawn(move || demux_async_loop(s, ictx))
        } else {
            let s = shared.clone();
            thread::spawn(move || demux_loop(s, ictx))
        });

        if let Some(decoder) = self.vid_decoder.take() {
            let s = shared.clone();
            self.viddec_h = Some(thread::spawn(move || video_decode_loop(s, decoder)));
        }

        // Scrubbing only decodes the stream that drives the preview: video
        // when present, audio otherwise.
        let want_audio = shared.has_audio() && (!async_mode || !shared.has_video());
        if want_audio {
            if let Some(decoder) = self.aud_decoder.take() {
                let s = shared.clone();
                self.auddec_h = Some(thread::spawn(move || audio_decode_loop(s, decoder)));
            }
            if let Some(swr) = self.swr_ctx.take() {
                let s = shared.clone();
                self.swr_h = Some(thread::spawn(move || resample_loop(s, swr)));
            }
        }

        self.render_h = Some(if async_mode {
            let s = shared;
            thread::spawn(move || render_async_loop(s))
        } else {
            let s = shared;
            thread::spawn(move || render_loop(s))
        });
    }

    fn stop_threads(&mut self) {
        let Some(shared) = &self.shared else { return };
        shared.quit.store(true, Ordering::Release);
        shared.is_playing.store(false, Ordering::Release);

        if let Some(h) = self.demux_h.take() {
            if let Ok(ictx) = h.join() {
                self.ictx = Some(ictx);
            }
        }
        if let Some(h) = self.viddec_h.take() {
            if let Ok(decoder) = h.join() {
                self.vid_decoder = Some(decoder);
            }
        }
        if let Some(h) = self.auddec_h.take() {
            if let Ok(decoder) = h.join() {
                self.aud_decoder = Some(decoder);
            }
        }
        if let Some(h) = self.swr_h.take() {
            if let Ok(swr) = h.join() {
                self.swr_ctx = Some(swr);
            }
        }
        if let Some(h) = self.render_h.take() {
            h.join().ok();
        }
        self.is_playing = false;
    }

    fn flush_all(&mut self) {
        let Some(shared) = &self.shared else { return };
        shared.vid_pkt_q.flush();
        shared.aud_pkt_q.flush();
        shared.vid_frm_q.flush();
        shared.aud_frm_q.flush();
        shared.swr_frm_q.flush();
        shared.demux_eof.store(false, Ordering::Release);
        shared.viddec_eof.store(false, Ordering::Release);
        shared.auddec_eof.store(false, Ordering::Release);
        shared.swr_eof.store(false, Ordering::Release);
        shared.render_eof.store(false, Ordering::Release);
        shared.audio_ms.store(0, Ordering::Release);
        if let Some(byte_stream) = &self.byte_stream {
            byte_stream.reset();
        }
        // Drain stale frames from the previous run so consumers never see
        // pre-seek output.
        if let Some(rx) = &self.frame_rx {
            while rx.try_recv().is_ok() {}
        }
    }

    fn flush_decoders(&mut self) {
        if let Some(decoder) = &mut self.vid_decoder {
            decoder.flush();
        }
        if let Some(decoder) = &mut self.aud_decoder {
            decoder.flush();
        }
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Stage loops ───────────────────────────────────────────────────────────────

fn demux_loop(
    shared: Arc<Shared>,
    mut ictx: ffmpeg::format::context::Input,
) -> ffmpeg::format::context::Input {
    log::debug!("demux stage started");
    let mut pending: Option<(usize, ffmpeg::Packet)> = None;

    while !shared.quitting() {
        let mut idle = true;

        if pending.is_none() {
            match ictx.packets().next() {
                Some(Ok((stream, packet))) => {
                    pending = Some((stream.index(), packet));
                    idle = false;
                }
                Some(Err(ffmpeg::Error::Eof)) | None => {
                    log::debug!("demux eof");
                    break;
                }
                Some(Err(e)) => {
                    shared.set_err(format!("demuxer error: {e}"));
                    break;
                }
            }
        }

        if let Some((idx, _)) = &pending {
            let idx = *idx;
            if Some(idx) == shared.vid_idx {
                match shared.vid_pkt_q.push_if_room(pending.take().unwrap().1) {
                    Ok(()) => idle = false,
                    Err(pkt) => pending = Some((idx, pkt)),
                }
            } else if Some(idx) == shared.aud_idx {
                if shared.has_video() {
                    // Cap-exempt: audio may never stall the video packet flow.
                    shared.aud_pkt_q.push(pending.take().unwrap().1);
                    idle = false;
                } else {
                    match shared.aud_pkt_q.push_if_room(pending.take().unwrap().1) {
                        Ok(()) => idle = false,
                        Err(pkt) => pending = Some((idx, pkt)),
                    }
                }
            } else {
                pending = None; // other streams discarded
            }
        }

        if idle {
            thread::sleep(IDLE_POLL);
        }
    }
    shared.demux_eof.store(true, Ordering::Release);
    log::debug!("demux stage stopped");
    ictx
}

/// Read forward until the next packet of `stream_idx`; returns its PTS, or
/// `i64::MAX` at EOF. Consumes intermediate packets (the window probe does
/// not preserve demux position - the caller re-seeks afterwards anyway).
fn read_next_stream_packet(
    ictx: &mut ffmpeg::format::context::Input,
    stream_idx: usize,
) -> Result<i64, String> {
    loop {
        match ictx.packets().next() {
            Some(Ok((stream, packet))) => {
                if stream.index() == stream_idx {
                    return Ok(packet.pts().unwrap_or(i64::MIN));
                }
            }
            Some(Err(ffmpeg::Error::Eof)) | None => return Ok(i64::MAX),
            Some(Err(e)) => return Err(format!("av_read_frame failed: {e}")),
        }
    }
}

fn demux_async_loop(
    shared: Arc<Shared>,
    mut ictx: ffmpeg::format::context::Input,
) -> ffmpeg::format::context::Input {
    log::debug!("demux stage (scrub) started");
    let mut pending: Option<(usize, ffmpeg::Packet)> = None;
    // The window [seek_pos0, seek_pos1) brackets the target's keyframe range
    // in video-stream time-base units.
    let (mut seek_pos0, mut seek_pos1) = (i64::MIN, i64::MIN);

    while !shared.quitting() {
        let mut idle = true;

        if let Some(vid_idx) = shared.vid_idx {
            let target = shared.async_seek_pos.load(Ordering::Acquire);
            if target != i64::MIN {
                let (tbn, tbd) = shared.vid_tb;
                let vid_seek_pos = ms_to_pts(target, tbn, tbd);
                if vid_seek_pos < seek_pos0 || vid_seek_pos >= seek_pos1 {
                    pending = None;
                    // Forward seek past the target finds the next keyframe -
                    // the window's upper bound.
                    let err = unsafe {
                        ffmpeg::ffi::avformat_seek_file(
                            ictx.as_mut_ptr(),
                            vid_idx as i32,
                            vid_seek_pos + 1,
                            vid_seek_pos + 1,
                            i64::MAX,
                            0,
                        )
                    };
                    if err < 0 {
                        shared.set_err(format!("scrub window upper seek failed ({err})"));
                        break;
                    }
                    match read_next_stream_packet(&mut ictx, vid_idx) {
                        Ok(pts) => seek_pos1 = pts,
                        Err(e) => {
                            shared.set_err(e);
                            break;
                        }
                    }
                    // Backward seek lands on the keyframe at or before the
                    // target - the lower bound, and where reading resumes.
                    let err = unsafe {
                        ffmpeg::ffi::avformat_seek_file(
                            ictx.as_mut_ptr(),
                            vid_idx as i32,
                            i64::MIN,
                            vid_seek_pos,
                            vid_seek_pos,
                            0,
                        )
                    };
                    if err < 0 {
                        shared.set_err(format!("scrub window lower seek failed ({err})"));
                        break;
                    }
                    match read_next_stream_packet(&mut ictx, vid_idx) {
                        Ok(pts) => seek_pos0 = pts,
                        Err(e) => {
                            shared.set_err(e);
                            break;
                        }
                    }
                    let (tbn, tbd) = shared.vid_tb;
                    log::debug!(
                        "scrub window: [{}, {})",
                        format_millis(pts_to_ms(seek_pos0, tbn, tbd)),
                        format_millis(pts_to_ms(seek_pos1.min(i64::MAX / 2), tbn, tbd)),
                    );
                    // The probe consumed packets; re-read from the lower bound.
                    let err = unsafe {
                        ffmpeg::ffi::avformat_seek_file(
                            ictx.as_mut_ptr(),
                            vid_idx as i32,
                            i64::MIN,
                            vid_seek_pos,
                            vid_seek_pos,
                            0,
                        )
                    };
                    if err < 0 {
                        shared.set_err(format!("scrub window restart seek failed ({err})"));
                        break;
                    }
                }
            }
        }

        if pending.is_none() {
            match ictx.packets().next() {
                Some(Ok((stream, packet))) => {
                    pending = Some((stream.index(), packet));
                    idle = false;
                }
                Some(Err(ffmpeg::Error::Eof)) | None => {
                    // The scrub demuxer parks at EOF until the target moves.
                    thread::sleep(IDLE_POLL);
                    continue;
                }
                Some(Err(e)) => {
                    shared.set_err(format!("demuxer error: {e}"));
                    break;
                }
            }
        }

        if let Some((idx, pkt)) = &pending {
            let idx = *idx;
            if Some(idx) == shared.vid_idx {
                // Only packets inside the window are wanted; everything past
                // the upper keyframe is beyond the target's GOP.
                let pts = pkt.pts().unwrap_or(i64::MIN);
                if pts >= seek_pos1 {
                    pending = None;
                } else {
                    match shared.vid_pkt_q.push_if_room(pending.take().unwrap().1) {
                        Ok(()) => idle = false,
                        Err(p) => pending = Some((idx, p)),
                    }
                }
            } else if Some(idx) == shared.aud_idx && !shared.has_video() {
                match shared.aud_pkt_q.push_if_room(pending.take().unwrap().1) {
                    Ok(()) => idle = false,
                    Err(p) => pending = Some((idx, p)),
                }
            } else {
                pending = None;
            }
        }

        if idle {
            thread::sleep(IDLE_POLL);
        }
    }
    shared.demux_eof.store(true, Ordering::Release);
    log::debug!("demux stage (scrub) stopped");
    ictx
}

fn video_decode_loop(
    shared: Arc<Shared>,
    mut decoder: ffmpeg::decoder::Video,
) -> ffmpeg::decoder::Video {
    log::debug!("video decode stage started");
    let (tbn, tbd) = shared.vid_tb;
    let mut pending_frame: Option<AvVideoFrame> = None;
    let mut pending_pkt: Option<ffmpeg::Packet> = None;
    let mut input_eof = false;

    'run: while !shared.quitting() {
        let mut idle = true;

        // Drain decoder output into the frame queue.
        loop {
            if pending_frame.is_none() {
                let mut frame = AvVideoFrame::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        idle = false;
                        if shared.after_seek.load(Ordering::Acquire) {
                            let ms = pts_to_ms(frame.pts().unwrap_or(0), tbn, tbd);
                            if shared.seek_to_i.load(Ordering::Acquire) && !shared.has_audio() {
                                // Seek-to-I: the first decoded keyframe sets
                                // the effective target.
                                shared.seek_to_ms.store(ms, Ordering::Release);
                                shared.seek_to_i.store(false, Ordering::Release);
                            }
                            if ms < shared.seek_to_ms.load(Ordering::Acquire) {
                                continue; // pre-seek frame, discard after decode
                            }
                        }
                        pending_frame = Some(frame);
                    }
                    Err(ffmpeg::Error::Other { errno: EAGAIN }) => break,
                    Err(ffmpeg::Error::Eof) => break 'run,
                    Err(e) => {
                        shared.set_err(format!("video decoder error: {e}"));
                        break 'run;
                    }
                }
            }
            if let Some(frame) = pending_frame.take() {
                match shared.vid_frm_q.push_if_room(frame) {
                    Ok(()) => idle = false,
                    Err(frame) => {
                        pending_frame = Some(frame);
                        break; // queue full - hold the frame across the sleep
                    }
                }
            }
        }

        // Feed packets into the decoder.
        if !input_eof {
            loop {
                if pending_pkt.is_none() {
                    pending_pkt = shared.vid_pkt_q.pop_if_available();
                }
                let Some(pkt) = pending_pkt.take() else { break };
                match decoder.send_packet(&pkt) {
                    Ok(()) => idle = false,
                    Err(ffmpeg::Error::Other { errno: EAGAIN }) => {
                        pending_pkt = Some(pkt);
                        break;
                    }
                    Err(e) => {
                        shared.set_err(format!("video decoder send error: {e}"));
                        break 'run;
                    }
                }
            }
            if pending_pkt.is_none()
                && shared.vid_pkt_q.is_empty()
                && shared.demux_eof.load(Ordering::Acquire)
            {
                let _ = decoder.send_eof();
                input_eof = true;
                idle = false;
            }
        }

        if idle {
            thread::sleep(IDLE_POLL);
        }
    }
    shared.viddec_eof.store(true, Ordering::Release);
    shared.vid_frm_q.close();
    log::debug!("video decode stage stopped");
    decoder
}

fn audio_decode_loop(
    shared: Arc<Shared>,
    mut decoder: ffmpeg::decoder::Audio,
) -> ffmpeg::decoder::Audio {
    log::debug!("audio decode stage started");
    let (tbn, tbd) = shared.aud_tb;
    let mut pending_frame: Option<AvAudioFrame> = None;
    let mut pending_pkt: Option<ffmpeg::Packet> = None;
    let mut input_eof = false;

    'run: while !shared.quitting() {
        let mut idle = true;

        loop {
            if pending_frame.is_none() {
                let mut frame = AvAudioFrame::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        idle = false;
                        // Track the average frame duration so the resample
                        // queue buffers ~0.5 s of audio regardless of the
                        // codec's frame size.
                        let rate = frame.rate().max(1);
                        let dur = frame.samples() as f64 / rate as f64;
                        {
                            let mut avg = shared.avg_aud_frm_dur.lock().unwrap();
                            *avg = (*avg * (AUD_FRM_AVG_WINDOW - 1.0) + dur) / AUD_FRM_AVG_WINDOW;
                            let swr_max = (AUD_Q_DURATION_SECS / *avg).ceil() as usize;
                            shared.swr_frm_q.set_max_len(swr_max.max(1));
                            shared
                                .aud_frm_q
                                .set_max_len(((swr_max as f64 / 5.0).ceil() as usize).max(1));
                        }
                        if shared.after_seek.load(Ordering::Acquire) {
                            let ms = pts_to_ms(frame.pts().unwrap_or(0), tbn, tbd);
                            if shared.seek_to_i.load(Ordering::Acquire) {
                                // With audio present the first decoded audio
                                // frame defines the effective seek target.
                                shared.seek_to_ms.store(ms, Ordering::Release);
                                shared.seek_to_i.store(false, Ordering::Release);
                            }
                            if ms < shared.seek_to_ms.load(Ordering::Acquire) {
                                shared.audio_ms.store(ms, Ordering::Release);
                                if !shared.has_video() {
                                    shared.after_seek.store(false, Ordering::Release);
                                }
                                continue;
                            }
                            if !shared.has_video() {
                                shared.after_seek.store(false, Ordering::Release);
                            }
                        }
                        pending_frame = Some(frame);
                    }
                    Err(ffmpeg::Error::Other { errno: EAGAIN }) => break,
                    Err(ffmpeg::Error::Eof) => break 'run,
                    Err(e) => {
                        shared.set_err(format!("audio decoder error: {e}"));
                        break 'run;
                    }
                }
            }
            if let Some(frame) = pending_frame.take() {
                match shared.aud_frm_q.push_if_room(frame) {
                    Ok(()) => idle = false,
                    Err(frame) => {
                        pending_frame = Some(frame);
                        break;
                    }
                }
            }
        }

        if !input_eof {
            loop {
                if pending_pkt.is_none() {
                    pending_pkt = shared.aud_pkt_q.pop_if_available();
                }
                let Some(pkt) = pending_pkt.take() else { break };
                match decoder.send_packet(&pkt) {
                    Ok(()) => idle = false,
                    Err(ffmpeg::Error::Other { errno: EAGAIN }) => {
                        pending_pkt = Some(pkt);
                        break;
                    }
                    Err(e) => {
                        shared.set_err(format!("audio decoder send error: {e}"));
                        break 'run;
                    }
                }
            }
            if pending_pkt.is_none()
                && shared.aud_pkt_q.is_empty()
                && shared.demux_eof.load(Ordering::Acquire)
            {
                let _ = decoder.send_eof();
                input_eof = true;
                idle = false;
            }
        }

        if idle {
            thread::sleep(IDLE_POLL);
        }
    }
    shared.auddec_eof.store(true, Ordering::Release);
    log::debug!("audio decode stage stopped");
    decoder
}

fn resample_loop(
    shared: Arc<Shared>,
    mut swr: Option<resampling::Context>,
) -> Option<resampling::Context> {
    log::debug!("resample stage started");
    while !shared.quitting() {
        let mut idle = true;

        if shared.swr_frm_q.has_room() {
            if let Some(src) = shared.aud_frm_q.pop_if_available() {
                idle = false;
                match &mut swr {
                    // Source already matches the render format: pass the
                    // frame through without a copy.
                    None => shared.swr_frm_q.push(src),
                    Some(ctx) => {
                        let mut dst = AvAudioFrame::empty();
                        match ctx.run(&src, &mut dst) {
                            Ok(_) => {
                                dst.set_pts(src.pts());
                                shared.swr_frm_q.push(dst);
                            }
                            Err(e) => {
                                shared.set_err(format!("resample error: {e}"));
                                break;
                            }
                        }
                    }
                }
            } else if shared.auddec_eof.load(Ordering::Acquire) {
                break;
            }
        }

        if idle {
            thread::sleep(IDLE_POLL);
        }
    }
    shared.swr_eof.store(true, Ordering::Release);
    shared.swr_frm_q.close();
    log::debug!("resample stage stopped");
    swr
}

fn render_loop(shared: Arc<Shared>) {
    log::debug!("render stage started");
    let (tbn, tbd) = shared.vid_tb;
    let mut converter = RgbaConverter::new();

    while !shared.quitting() {
        if !shared.is_playing.load(Ordering::Acquire) {
            thread::sleep(IDLE_POLL);
            continue;
        }
        let mut idle = true;

        // The play head. Audio is the master clock whenever it exists; the
        // wall clock with pause accounting drives video-only playback.
        let play_pos = if shared.has_audio() {
            shared.audio_ms.load(Ordering::Acquire) - shared.audio_offset.load(Ordering::Acquire)
        } else if shared.after_seek.load(Ordering::Acquire) {
            shared.seek_to_ms.load(Ordering::Acquire)
        } else {
            let run_start = shared.run_start.lock().unwrap();
            match *run_start {
                Some(t0) => {
                    t0.elapsed().as_millis() as i64 + shared.pos_offset.load(Ordering::Acquire)
                        - shared.paused_dur.load(Ordering::Acquire)
                }
                None => 0,
            }
        };
        shared.play_pos.store(play_pos, Ordering::Release);

        if shared.has_video() && !shared.vid_frm_q.is_empty() {
            if shared.after_seek.swap(false, Ordering::AcqRel) && !shared.has_audio() {
                // Restart the wall clock at the (possibly keyframe-snapped)
                // seek target now that frames are flowing again.
                *shared.run_start.lock().unwrap() = Some(Instant::now());
                shared
                    .pos_offset
                    .store(shared.seek_to_ms.load(Ordering::Acquire), Ordering::Release);
            }
            if let Some(frame) = shared
                .vid_frm_q
                .pop_if(|f| pts_to_ms(f.pts().unwrap_or(0), tbn, tbd) <= play_pos)
            {
                let ms = pts_to_ms(frame.pts().unwrap_or(0), tbn, tbd);
                match converter.convert(&frame, 0, 0, ms) {
                    Ok(vf) => {
                        let _ = shared.frame_tx.try_send(vf.clone());
                        *shared.video_out.lock().unwrap() = Some(vf);
                    }
                    Err(e) => log::warn!("frame conversion failed: {e}"),
                }
                idle = false;
            }
        }

        if idle {
            thread::sleep(std::time::Duration::from_millis(1));
        }
    }
    shared.render_eof.store(true, Ordering::Release);
    log::debug!("render stage stopped");
}

fn render_async_loop(shared: Arc<Shared>) {
    log::debug!("render stage (scrub) started");
    let (tbn, tbd) = shared.vid_tb;
    let mut converter = RgbaConverter::new();
    let mut cache = FrameCache::new();
    let mut prev_target = i64::MIN;

    while !shared.quitting() {
        let mut idle = true;
        let target = shared.async_seek_pos.load(Ordering::Acquire);

        let mut cache_updated = false;
        while let Some(frame) = shared.vid_frm_q.pop_if_available() {
            let ms = pts_to_ms(frame.pts().unwrap_or(0), tbn, tbd);
            match converter.convert(&frame, 0, 0, ms) {
                Ok(vf) => {
                    if cache.insert(vf, target) {
                        cache_updated = true;
                    }
                }
                Err(e) => log::warn!("frame conversion failed: {e}"),
            }
        }

        if target != i64::MIN && (target != prev_target || cache_updated) {
            if let Some(best) = cache.closest(target) {
                let _ = shared.frame_tx.try_send(best.clone());
                *shared.video_out.lock().unwrap() = Some(best.clone());
                shared.play_pos.store(best.time_stamp, Ordering::Release);
            }
            prev_target = target;
            idle = false;
        }

        if idle {
            thread::sleep(std::time::Duration::from_millis(1));
        }
    }
    log::debug!("render stage (scrub) stopped");
}
