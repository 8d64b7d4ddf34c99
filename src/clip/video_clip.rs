//! Video clip playback state machine
//!
//! A `VideoClip` owns one open stream end to end: the byte source and
//! page scanner, the video packet assembler and decoder, an optional
//! audio decode state with its sink, the frame queue, and the playback
//! clock. Decoding happens on whichever worker thread the engine
//! assigns; the consumer surface (`get_next_frame`, `pop_frame`) and the
//! driver surface (`advance`, `flush_decoded_audio`) never block on
//! decode progress.
//!
//! Lock order within a clip is decode state, then audio state; the
//! frame queue and clock have their own short-lived locks and are never
//! held across either.

use crate::audio::{AudioSink, AudioSinkFactory};
use crate::clip::queue::{FrameQueue, FrontFrame};
use crate::clip::timer::{Clock, Timer};
use crate::codec::{self, AudioDecoder, StreamCodec, VideoDecoder};
use crate::container::{Page, PageScanner, StreamAssembler};
use crate::convert::{self, OutputMode, StrideMode};
use crate::source::DataSource;
use crate::utils::config::{EngineConfig, PlaybackConfig, SeekConfig};
use crate::utils::error::{Error, Result};
use crate::utils::AtomicF64;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// How to open a clip
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Pixel layout written into frame buffers
    pub output_mode: OutputMode,

    /// Row stride policy for frame buffers
    pub stride_mode: StrideMode,

    /// Frame queue capacity; `None` uses the engine default
    pub precached_frames: Option<usize>,

    /// Loop back to the start when the stream ends instead of entering
    /// end-of-stream
    pub auto_restart: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::Rgb24,
            stride_mode: StrideMode::Natural,
            precached_frames: None,
            auto_restart: false,
        }
    }
}

/// Cooperative seek state, observed by the next decode call
#[derive(Debug, Clone, Copy, PartialEq)]
enum SeekPhase {
    /// No seek in progress
    Idle,
    /// A target time is set; a worker will run the seek
    Requested(f64),
    /// Positioned near the target; discard packets until a keyframe
    AwaitKeyframe,
}

/// Demux and video decode state, held by the assigned worker during a
/// decode
struct DecodeState {
    source: Box<dyn DataSource>,
    scanner: PageScanner,
    video: StreamAssembler,
    decoder: Box<dyn VideoDecoder>,
    scratch: Vec<u8>,
}

/// Audio decode state, guarded separately so the driver's audio flush
/// and the worker's page routing can interleave
struct AudioState {
    assembler: StreamAssembler,
    decoder: Box<dyn AudioDecoder>,
    sink: Box<dyn AudioSink>,
    gain: f32,
    /// Set once the first positioned audio page after a seek has been
    /// discarded
    skip_seek_flag: bool,
}

/// One open video stream and its playback state
pub struct VideoClip {
    name: String,

    decode: Mutex<DecodeState>,
    audio: Mutex<Option<AudioState>>,
    audio_serial: Option<u32>,
    queue: FrameQueue,

    default_clock: Arc<Timer>,
    clock: RwLock<Arc<dyn Clock>>,

    cfg: PlaybackConfig,
    seek_cfg: SeekConfig,

    width: u32,
    height: u32,
    stride: u32,
    stride_mode: StrideMode,
    fps: f64,

    active_mode: AtomicU8,
    requested_mode: AtomicU8,
    reconfiguring: AtomicBool,

    duration: AtomicF64,
    frame_count: AtomicU64,

    end_of_stream: AtomicBool,
    restarted: AtomicBool,
    auto_restart: AtomicBool,
    iteration: AtomicBool,
    last_iteration: AtomicBool,
    thaw_after_seek: AtomicBool,
    seek: Mutex<SeekPhase>,

    displayed_frames: AtomicU64,
    dropped_frames: AtomicU64,

    /// Worker currently decoding for this clip; at most one at any time
    assignment: Mutex<Option<usize>>,
    released: Condvar,
}

struct ParsedHeaders {
    video_serial: u32,
    video: Box<dyn VideoDecoder>,
    audio: Option<(u32, Box<dyn AudioDecoder>)>,
    first_data_page: Option<Page>,
}

impl VideoClip {
    /// Open a stream: parse headers, probe duration, size the frame
    /// queue, and attach an audio sink if the stream has audio and a
    /// factory is registered
    pub(crate) fn open(
        mut source: Box<dyn DataSource>,
        options: OpenOptions,
        config: &EngineConfig,
        audio_factory: Option<&dyn AudioSinkFactory>,
    ) -> Result<Self> {
        let name = source.repr();
        let chunk = config.playback.read_chunk_size;
        let mut scanner = PageScanner::new();

        let mut headers =
            Self::parse_headers(&mut *source, &mut scanner, chunk, audio_factory.is_some())?;

        // find the stream duration by scanning growing tail windows for
        // the last video page's granule, then return to the data start
        let probed = Self::probe_duration(
            &mut *source,
            &mut scanner,
            chunk,
            headers.video_serial,
            &*headers.video,
        );
        match probed {
            Some((duration, _)) => info!("{}: stream duration is {:.3} seconds", name, duration),
            None => warn!("{}: unable to determine stream duration", name),
        }
        headers.first_data_page =
            Self::reposition_after_headers(&mut *source, &mut scanner, chunk)?;
        let (duration, frame_count) = probed.unwrap_or((-1.0, 0));

        let info = headers.video.info().clone();
        let stride = options.stride_mode.stride_for(info.width);
        let buffer_len = options.output_mode.buffer_len(stride, info.height);
        let precache = options
            .precached_frames
            .unwrap_or(config.playback.precached_frames)
            .max(1);

        let mut video = StreamAssembler::new(headers.video_serial);
        let mut audio_serial = None;
        let mut audio_state = None;
        if let Some((serial, decoder)) = headers.audio {
            if let Some(factory) = audio_factory {
                let ainfo = decoder.info().clone();
                let sink = factory.create_sink(ainfo.channels, ainfo.sample_rate);
                audio_serial = Some(serial);
                audio_state = Some(AudioState {
                    assembler: StreamAssembler::new(serial),
                    decoder,
                    sink,
                    gain: 1.0,
                    skip_seek_flag: false,
                });
            }
        }
        if let Some(page) = headers.first_data_page {
            if page.serial == headers.video_serial {
                video.page_in(&page);
            } else if Some(page.serial) == audio_serial {
                if let Some(state) = audio_state.as_mut() {
                    state.assembler.page_in(&page);
                }
            }
        }

        let default_clock = Arc::new(Timer::new());
        let fps = info.fps();
        Ok(Self {
            name,
            decode: Mutex::new(DecodeState {
                source,
                scanner,
                video,
                decoder: headers.video,
                scratch: vec![0; chunk],
            }),
            audio: Mutex::new(audio_state),
            audio_serial,
            queue: FrameQueue::new(precache, buffer_len),
            clock: RwLock::new(default_clock.clone() as Arc<dyn Clock>),
            default_clock,
            cfg: config.playback.clone(),
            seek_cfg: config.seek.clone(),
            width: info.width,
            height: info.height,
            stride,
            stride_mode: options.stride_mode,
            fps,
            active_mode: AtomicU8::new(options.output_mode.to_u8()),
            requested_mode: AtomicU8::new(options.output_mode.to_u8()),
            reconfiguring: AtomicBool::new(false),
            duration: AtomicF64::new(duration),
            frame_count: AtomicU64::new(frame_count),
            end_of_stream: AtomicBool::new(false),
            restarted: AtomicBool::new(false),
            auto_restart: AtomicBool::new(options.auto_restart),
            iteration: AtomicBool::new(false),
            last_iteration: AtomicBool::new(false),
            thaw_after_seek: AtomicBool::new(false),
            seek: Mutex::new(SeekPhase::Idle),
            displayed_frames: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            assignment: Mutex::new(None),
            released: Condvar::new(),
        })
    }

    /// Read BOS pages and probe codecs until the first data page ends
    /// header discovery
    fn parse_headers(
        source: &mut dyn DataSource,
        scanner: &mut PageScanner,
        chunk: usize,
        want_audio: bool,
    ) -> Result<ParsedHeaders> {
        let mut video: Option<(u32, Box<dyn VideoDecoder>)> = None;
        let mut audio: Option<(u32, Box<dyn AudioDecoder>)> = None;
        let mut first_data_page = None;
        let mut buf = vec![0u8; chunk];

        'read: loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            scanner.push_bytes(&buf[..n]);
            while let Some(page) = scanner.next_page() {
                if !page.bos {
                    first_data_page = Some(page);
                    break 'read;
                }
                let Some(header_packet) = page.packets.first() else {
                    continue;
                };
                match codec::probe(header_packet) {
                    Some(Ok(StreamCodec::Video(decoder))) => {
                        if video.is_none() {
                            video = Some((page.serial, decoder));
                        }
                    }
                    Some(Ok(StreamCodec::Audio(decoder))) => {
                        if audio.is_none() && want_audio {
                            audio = Some((page.serial, decoder));
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        warn!("stream {:#x}: unknown codec, ignoring", page.serial);
                    }
                }
            }
        }

        let Some((video_serial, video)) = video else {
            return Err(Error::malformed(
                "end of stream while reading headers, no video stream found",
            ));
        };
        Ok(ParsedHeaders {
            video_serial,
            video,
            audio,
            first_data_page,
        })
    }

    /// Scan growing windows at the end of the stream for the last video
    /// granule
    fn probe_duration(
        source: &mut dyn DataSource,
        scanner: &mut PageScanner,
        chunk: usize,
        video_serial: u32,
        decoder: &dyn VideoDecoder,
    ) -> Option<(f64, u64)> {
        let size = source.size();
        for i in 1..=10u64 {
            let window = (chunk as u64) * i;
            let start = size.saturating_sub(window);
            scanner.reset();
            if source.seek(start).is_err() {
                break;
            }
            let mut buf = vec![0u8; window as usize];
            let n = match source.read(&mut buf) {
                Ok(n) => n,
                Err(_) => break,
            };
            scanner.push_bytes(&buf[..n]);

            let mut last_granule = None;
            while let Some(page) = scanner.next_page() {
                if page.serial == video_serial && page.granule >= 0 {
                    last_granule = Some(page.granule);
                }
            }
            if let Some(granule) = last_granule {
                return Some((
                    decoder.granule_time(granule),
                    decoder.granule_frame(granule) + 1,
                ));
            }
            if start == 0 {
                break;
            }
        }
        None
    }

    /// Seek back to the stream start and skip past the header pages,
    /// returning the first data page if one follows
    fn reposition_after_headers(
        source: &mut dyn DataSource,
        scanner: &mut PageScanner,
        chunk: usize,
    ) -> Result<Option<Page>> {
        scanner.reset();
        source.seek(0)?;
        let mut buf = vec![0u8; chunk];
        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                return Ok(None);
            }
            scanner.push_bytes(&buf[..n]);
            while let Some(page) = scanner.next_page() {
                if !page.bos {
                    return Ok(Some(page));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // worker side
    // ------------------------------------------------------------------

    /// Decode exactly one frame into the queue
    ///
    /// No-ops when the queue has no free slot (back-pressure) or the
    /// clip is at end-of-stream. Runs on the assigned worker thread.
    pub(crate) fn decode_next_frame(&self) {
        if self.end_of_stream.load(Ordering::Acquire) {
            return;
        }
        let Some(mut lease) = self.queue.request_empty() else {
            return; // precache limit reached
        };
        let mut ds = self.decode.lock();
        let mut skipped = 0u64;

        loop {
            let Some(packet) = ds.video.packet_out() else {
                if !self.read_more_data(&mut ds) {
                    self.queue.abandon(lease);
                    return;
                }
                continue;
            };

            if *self.seek.lock() == SeekPhase::AwaitKeyframe {
                if !ds.decoder.is_keyframe(&packet) {
                    skipped += 1;
                    continue;
                }
                *self.seek.lock() = SeekPhase::Idle;
                if skipped > 0 {
                    debug!(
                        "{} [seek]: skipped {} frames while searching for keyframe",
                        self.name, skipped
                    );
                }
            }

            let granule = match ds.decoder.decode_packet(&packet) {
                Ok(granule) => granule,
                Err(_) => continue, // undecodable packet, e.g. a header
            };
            let time = ds.decoder.granule_time(granule);
            let frame_number = ds.decoder.granule_frame(granule);
            if time > self.duration.load() {
                self.duration.store(time); // duration corrections
            }

            let restarted = self.restarted.load(Ordering::Acquire);
            if time < self.clock().time() && !restarted {
                // already behind schedule, not worth converting
                self.displayed_frames.fetch_add(1, Ordering::Relaxed);
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let mode = self.output_mode();
            convert::convert(ds.decoder.frame(), mode, self.stride, lease.buffer_mut());
            let iteration = self.iteration.load(Ordering::Acquire) ^ restarted;
            self.queue.commit(lease, time, iteration, frame_number);
            return;
        }
    }

    /// Pull container data until the video assembler can make progress,
    /// keeping audio demuxed a little ahead of the clock
    ///
    /// Returns false when the source is exhausted; that either flags a
    /// restart (auto-restart on) or end-of-stream.
    fn read_more_data(&self, ds: &mut DecodeState) -> bool {
        let clip_time = if self.restarted.load(Ordering::Acquire) {
            0.0
        } else {
            self.clock().time()
        };
        let mut audio_time = 0.0f64;
        let mut audio_eos = false;

        loop {
            let n = match ds.source.read(&mut ds.scratch) {
                Ok(n) => n,
                Err(e) => {
                    warn!("{}: source read failed: {}", self.name, e);
                    self.end_of_stream.store(true, Ordering::Release);
                    return false;
                }
            };
            if n == 0 {
                if self.auto_restart.load(Ordering::Acquire) {
                    if let Err(e) = self.rewind(ds) {
                        warn!("{}: restart failed: {}", self.name, e);
                        self.end_of_stream.store(true, Ordering::Release);
                    }
                } else {
                    self.end_of_stream.store(true, Ordering::Release);
                }
                return false;
            }
            let filled = &ds.scratch[..n];
            ds.scanner.push_bytes(filled);

            while let Some(page) = ds.scanner.next_page() {
                if page.bos {
                    continue; // header pages reappear after a rewind
                }
                if page.serial == ds.video.serial() {
                    ds.video.page_in(&page);
                } else if Some(page.serial) == self.audio_serial {
                    let mut guard = self.audio.lock();
                    let Some(state) = guard.as_mut() else { continue };
                    if page.granule >= 0 {
                        audio_time = state.decoder.granule_time(page.granule);
                    }
                    audio_eos = page.eos;
                    if *self.seek.lock() == SeekPhase::AwaitKeyframe && !state.skip_seek_flag {
                        // drop audio pages still in flight from before
                        // the seek target
                        if page.granule >= 0 {
                            state.skip_seek_flag = true;
                        }
                        continue;
                    }
                    state.assembler.page_in(&page);
                }
            }

            let want_more_audio = self.audio_serial.is_some()
                && !audio_eos
                && audio_time < clip_time + self.cfg.audio_read_ahead;
            if !want_more_audio {
                return true;
            }
        }
    }

    /// Reset demux and decode state to the stream start without
    /// touching the frame queue
    fn rewind(&self, ds: &mut DecodeState) -> Result<()> {
        ds.decoder.reset();
        ds.video.reset();
        {
            let mut guard = self.audio.lock();
            if let Some(state) = guard.as_mut() {
                // decode out queued audio so the stream tail still plays
                while let Some(packet) = state.assembler.packet_out() {
                    let _ = state.decoder.packet_in(&packet);
                }
                state.assembler.reset();
            }
        }
        ds.scanner.reset();
        ds.source.seek(0)?;
        self.end_of_stream.store(false, Ordering::Release);
        self.restarted.store(true, Ordering::Release);
        Ok(())
    }

    /// Run a pending seek: bisect to the target, align to the preceding
    /// keyframe, align audio, reset the clock
    pub(crate) fn do_seek(&self) {
        let target = match *self.seek.lock() {
            SeekPhase::Requested(t) => t,
            _ => return,
        };
        let duration = self.duration.load();
        let frame_count = self.frame_count.load(Ordering::Acquire);
        if duration <= 0.0 || frame_count == 0 {
            warn!("{}: cannot seek, stream duration unknown", self.name);
            *self.seek.lock() = SeekPhase::Idle;
            return;
        }
        let target = target.clamp(0.0, duration);
        let target_frame = (frame_count as f64 * target / duration) as i64;

        let mut ds = self.decode.lock();
        self.queue.clear();

        if target_frame == 0 {
            // cheap full restart
            if let Err(e) = self.rewind(&mut ds) {
                warn!("{}: seek to start failed: {}", self.name, e);
            }
            self.restarted.store(false, Ordering::Release); // a user seek, not a loop boundary
            self.clock().seek(0.0);
            *self.seek.lock() = SeekPhase::Idle;
            self.thaw_after_seek.store(true, Ordering::Release);
            return;
        }

        self.end_of_stream.store(false, Ordering::Release);
        self.restarted.store(false, Ordering::Release);
        ds.video.reset();
        ds.decoder.reset();
        if let Some(state) = self.audio.lock().as_mut() {
            state.assembler.reset();
            state.decoder.restart();
        }

        // locate the preceding keyframe, then position the stream just
        // before it; the decoder then discards packets up to the
        // keyframe via the AwaitKeyframe phase
        let keyframe = self.seek_page(&mut ds, target_frame, true);
        if let Some(kf) = keyframe {
            self.seek_page(&mut ds, kf as i64, false);
        }

        let mut time = (target_frame as f64 / frame_count as f64) * duration;

        if let Some(audio_serial) = self.audio_serial {
            // scan forward for the audio page that first passes the
            // target so both streams resume aligned
            let mut guard = self.audio.lock();
            if let Some(state) = guard.as_mut() {
                'scan: loop {
                    while let Some(page) = ds.scanner.next_page() {
                        if page.serial == audio_serial && page.granule >= 0 {
                            let page_time = state.decoder.granule_time(page.granule);
                            if page_time > time {
                                time = page_time;
                                break 'scan;
                            }
                        } else if page.serial == ds.video.serial() && !page.bos {
                            ds.video.page_in(&page);
                        }
                    }
                    if !ds.pump(&self.name) {
                        break;
                    }
                }
                state.skip_seek_flag = false;
            }
        }

        self.clock().seek(time);
        *self.seek.lock() = SeekPhase::AwaitKeyframe;
        self.thaw_after_seek.store(true, Ordering::Release);
    }

    /// Byte-offset bisection over the page granules
    ///
    /// With `return_keyframe`, refines until it finds a page at or past
    /// `target_frame` and returns the keyframe index its granule builds
    /// on. Otherwise positions the stream on a page shortly before
    /// `target_frame`, feeds it to the assembler, and primes the
    /// decoder's granule position. The search is capped by the
    /// configured iteration budget rather than guaranteed to converge.
    fn seek_page(
        &self,
        ds: &mut DecodeState,
        target_frame: i64,
        return_keyframe: bool,
    ) -> Option<u64> {
        let mut seek_min = 0i64;
        let mut seek_max = ds.source.size() as i64;
        let mut granule: i64 = -1;
        let mut fineseek = false;
        let window = self.seek_cfg.fine_seek_window as i64;
        let mut located: Option<Page> = None;

        for _ in 0..self.seek_cfg.bisection_limit {
            ds.scanner.reset();
            let mid = (seek_min + seek_max) / 2;
            if ds.source.seek(mid as u64).is_err() {
                break;
            }
            loop {
                let page = match ds.scanner.next_page() {
                    Some(page) => page,
                    None => {
                        if !ds.pump(&self.name) {
                            break;
                        }
                        continue;
                    }
                };
                if page.serial != ds.video.serial() || page.granule < 0 {
                    continue;
                }
                granule = page.granule;
                let frame = ds.decoder.granule_frame(granule) as i64;

                if frame < target_frame - 1 && target_frame - frame < window {
                    fineseek = true;
                    if !return_keyframe {
                        located = Some(page);
                        break;
                    }
                }
                if fineseek && frame >= target_frame {
                    break;
                }
                if fineseek {
                    continue; // read forward to the target
                }
                if target_frame - 1 > frame {
                    seek_min = mid;
                } else {
                    seek_max = mid;
                }
                break;
            }
            if fineseek {
                break;
            }
        }

        if granule < 0 {
            warn!("{}: seek bisection found no usable page", self.name);
            return None;
        }
        if return_keyframe {
            return Some(ds.decoder.granule_keyframe(granule));
        }
        if let Some(page) = located {
            ds.video.page_in(&page);
        }
        ds.decoder.set_granule_position(granule);
        None
    }

    // ------------------------------------------------------------------
    // driver side
    // ------------------------------------------------------------------

    /// Advance the playback clock; called once per host frame from the
    /// engine's tick, never concurrently with itself
    pub(crate) fn advance(&self, dt: f64) {
        let clock = self.clock();
        let thaw = self.thaw_after_seek.swap(false, Ordering::AcqRel);
        if clock.is_paused() && !thaw {
            return;
        }
        clock.update(dt);

        let time = clock.time();
        let duration = self.duration.load();
        if duration <= 0.0 || time < duration {
            return;
        }
        if !(self.auto_restart.load(Ordering::Acquire) && self.restarted.load(Ordering::Acquire)) {
            return;
        }

        // the previous restart cycle has fully drained: cross the loop
        // boundary
        let new_iteration = !self.iteration.load(Ordering::Acquire);
        self.iteration.store(new_iteration, Ordering::Release);
        clock.seek(time - duration);
        self.restarted.store(false, Ordering::Release);

        let mut dropped = 0u64;
        while let Some(meta) = self.queue.front_meta() {
            if meta.display_time <= self.cfg.end_frame_guard {
                break;
            }
            self.displayed_frames.fetch_add(1, Ordering::Relaxed);
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            self.queue.pop();
            dropped += 1;
        }
        if dropped > 0 {
            debug!("{}: dropped {} end frames at loop boundary", self.name, dropped);
        }
    }

    /// Drain decoded audio into the sink; called from the engine's tick
    pub(crate) fn flush_decoded_audio(&self) {
        if self.audio_serial.is_none() || self.clock().is_paused() {
            return;
        }
        let mut guard = self.audio.lock();
        let Some(state) = guard.as_mut() else { return };

        loop {
            if let Some(mut pcm) = state.decoder.pcm_out() {
                let count = pcm.first().map(|c| c.len()).unwrap_or(0);
                if count == 0 {
                    continue;
                }
                if state.gain < 1.0 {
                    for channel in &mut pcm {
                        for sample in channel.iter_mut() {
                            *sample *= state.gain;
                        }
                    }
                }
                state.sink.insert_samples(&pcm, count);
                continue;
            }
            if self.restarted.load(Ordering::Acquire) {
                break; // don't mix iterations in one flush
            }
            match state.assembler.packet_out() {
                Some(packet) => {
                    let _ = state.decoder.packet_in(&packet);
                }
                None => break,
            }
        }
    }

    // ------------------------------------------------------------------
    // consumer side
    // ------------------------------------------------------------------

    /// The first ready frame whose display time has arrived
    ///
    /// Stale frames past the lateness threshold are popped and counted
    /// as dropped rather than displayed, except inside the post-restart
    /// guard window where they are withheld instead. Never blocks on
    /// decode progress.
    pub fn get_next_frame(&self) -> Option<FrontFrame<'_>> {
        let time = self.clock().time();
        loop {
            let meta = self.queue.front_meta()?;
            if meta.display_time > time {
                return None;
            }
            if meta.display_time < time - self.cfg.late_frame_threshold {
                if self.restarted.load(Ordering::Acquire)
                    && meta.display_time < self.cfg.restart_guard
                {
                    // a fresh frame from the next iteration; the clock
                    // has not crossed the loop boundary yet
                    return None;
                }
                debug!("{}: dropped frame {}", self.name, meta.frame_number);
                self.displayed_frames.fetch_add(1, Ordering::Relaxed);
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                self.queue.pop();
                continue;
            }
            break;
        }
        let frame = self.queue.front()?;
        self.last_iteration.store(frame.iteration(), Ordering::Release);
        Some(frame)
    }

    /// Release the frame returned by [`get_next_frame`](Self::get_next_frame)
    /// after its contents have been consumed
    pub fn pop_frame(&self) {
        self.displayed_frames.fetch_add(1, Ordering::Relaxed);
        self.queue.pop();
    }

    /// Jump the clock to the next ready frame's display time, returning
    /// the jump in seconds; for hosts stepping frame by frame
    pub fn update_to_next_frame(&self) -> f64 {
        let Some(meta) = self.queue.front_meta() else {
            return 0.0;
        };
        let jump = meta.display_time - self.clock().time();
        self.advance(jump);
        jump
    }

    // ------------------------------------------------------------------
    // host control surface
    // ------------------------------------------------------------------

    pub fn play(&self) {
        self.clock().play();
    }

    pub fn pause(&self) {
        self.clock().pause();
    }

    pub fn is_paused(&self) -> bool {
        self.clock().is_paused()
    }

    /// Pause and rewind to the start
    pub fn stop(&self) {
        self.pause();
        self.seek(0.0);
    }

    /// Request a seek; the next worker servicing this clip performs it
    pub fn seek(&self, time: f64) {
        *self.seek.lock() = SeekPhase::Requested(time.max(0.0));
        self.end_of_stream.store(false, Ordering::Release);
    }

    /// Synchronously rewind to the start, dropping all queued frames
    ///
    /// Blocks until the assigned worker (if any) finishes its current
    /// decode.
    pub fn restart(&self) {
        // keep workers away while the stream rewinds
        self.end_of_stream.store(true, Ordering::Release);
        self.wait_unassigned();
        {
            let mut ds = self.decode.lock();
            if let Err(e) = self.rewind(&mut ds) {
                warn!("{}: restart failed: {}", self.name, e);
            }
        }
        self.clock().seek(0.0);
        self.queue.clear();
        self.end_of_stream.store(false, Ordering::Release);
        self.iteration.store(false, Ordering::Release);
        self.restarted.store(false, Ordering::Release);
        *self.seek.lock() = SeekPhase::Idle;
    }

    /// Substitute the playback clock, e.g. with an
    /// [`AudioClock`](crate::audio::AudioClock); `None` restores the
    /// clip's own timer
    pub fn set_clock(&self, clock: Option<Arc<dyn Clock>>) {
        let mut slot = self.clock.write();
        *slot = clock.unwrap_or_else(|| self.default_clock.clone() as Arc<dyn Clock>);
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.read().clone()
    }

    pub fn set_playback_speed(&self, speed: f64) {
        self.clock().set_speed(speed);
    }

    pub fn playback_speed(&self) -> f64 {
        self.clock().speed()
    }

    /// Switch the output pixel layout; discards ready frames and
    /// reallocates the queue
    pub fn set_output_mode(&self, mode: OutputMode) {
        if self.output_mode() == mode {
            return;
        }
        self.requested_mode.store(mode.to_u8(), Ordering::Release);
        self.reconfiguring.store(true, Ordering::Release);
        self.wait_unassigned();
        let buffer_len = mode.buffer_len(self.stride, self.height);
        self.queue.resize(self.queue.capacity(), buffer_len);
        self.active_mode.store(mode.to_u8(), Ordering::Release);
        self.reconfiguring.store(false, Ordering::Release);
    }

    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from_u8(self.active_mode.load(Ordering::Acquire))
    }

    /// Resize the frame queue; discards ready frames
    pub fn set_precached_frames(&self, count: usize) {
        let count = count.max(1);
        if count == self.queue.capacity() {
            return;
        }
        self.reconfiguring.store(true, Ordering::Release);
        self.wait_unassigned();
        self.queue.resize(count, self.queue.buffer_len());
        self.reconfiguring.store(false, Ordering::Release);
    }

    pub fn precached_frames(&self) -> usize {
        self.queue.capacity()
    }

    pub fn set_auto_restart(&self, value: bool) {
        self.auto_restart.store(value, Ordering::Release);
        if value {
            self.end_of_stream.store(false, Ordering::Release);
        }
    }

    pub fn auto_restart(&self) -> bool {
        self.auto_restart.load(Ordering::Acquire)
    }

    /// Attenuation applied to decoded audio, clamped to [0, 1]
    pub fn set_audio_gain(&self, gain: f32) {
        if let Some(state) = self.audio.lock().as_mut() {
            state.gain = gain.clamp(0.0, 1.0);
        }
    }

    pub fn audio_gain(&self) -> f32 {
        self.audio.lock().as_ref().map(|s| s.gain).unwrap_or(1.0)
    }

    /// Whether the clip carries an audio stream with an attached sink
    pub fn has_audio(&self) -> bool {
        self.audio_serial.is_some()
    }

    pub(crate) fn shutdown_audio(&self) {
        if let Some(state) = self.audio.lock().as_mut() {
            state.sink.stop();
        }
    }

    // ------------------------------------------------------------------
    // state queries
    // ------------------------------------------------------------------

    /// Source label used in log output
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride of output buffers, in pixels
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn stride_mode(&self) -> StrideMode {
        self.stride_mode
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Stream duration in seconds, if it could be determined
    pub fn duration(&self) -> Option<f64> {
        let d = self.duration.load();
        (d > 0.0).then_some(d)
    }

    /// Total number of frames in the stream, 0 when unknown
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Current playback position in seconds
    pub fn position(&self) -> f64 {
        self.clock().time()
    }

    /// End-of-stream reached and auto-restart is off
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    /// End-of-stream reached and every decoded frame consumed
    pub fn is_done(&self) -> bool {
        self.end_of_stream() && self.queue.ready_count() == 0
    }

    /// Loop iteration parity of the most recently returned frame
    pub fn last_iteration(&self) -> bool {
        self.last_iteration.load(Ordering::Acquire)
    }

    pub fn ready_frame_count(&self) -> usize {
        self.queue.ready_count()
    }

    /// Frames consumed or dropped so far (telemetry)
    pub fn displayed_frame_count(&self) -> u64 {
        self.displayed_frames.load(Ordering::Relaxed)
    }

    /// Frames discarded for being behind schedule (telemetry)
    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // scheduling support
    // ------------------------------------------------------------------

    /// Lower values are serviced first: unpaused, frame-starved clips
    /// win over paused, well-buffered ones
    pub(crate) fn priority_index(&self) -> f64 {
        let mut priority = self.queue.ready_count() as f64;
        if self.is_paused() {
            priority += self.queue.capacity() as f64 / 2.0;
        }
        priority
    }

    pub(crate) fn has_pending_seek(&self) -> bool {
        matches!(*self.seek.lock(), SeekPhase::Requested(_))
    }

    /// Busy clips are skipped by the scheduler entirely
    pub(crate) fn is_busy(&self) -> bool {
        self.assignment.lock().is_some()
            || self.requested_mode.load(Ordering::Acquire) != self.active_mode.load(Ordering::Acquire)
            || self.reconfiguring.load(Ordering::Acquire)
    }

    /// Whether handing this clip to a worker could accomplish anything
    pub(crate) fn wants_work(&self) -> bool {
        if self.has_pending_seek() {
            return true;
        }
        !self.end_of_stream.load(Ordering::Acquire) && self.queue.free_count() > 0
    }

    /// Claim the clip for a worker; the engine calls this under its
    /// registry lock
    pub(crate) fn try_assign(&self, worker: usize) -> bool {
        let mut assignment = self.assignment.lock();
        if assignment.is_some() {
            return false;
        }
        *assignment = Some(worker);
        true
    }

    /// Release the clip after a decode and wake anyone waiting on it
    pub(crate) fn release_assignment(&self) {
        let mut assignment = self.assignment.lock();
        *assignment = None;
        self.released.notify_all();
    }

    pub(crate) fn assigned_worker(&self) -> Option<usize> {
        *self.assignment.lock()
    }

    /// Block until no worker holds this clip
    pub(crate) fn wait_unassigned(&self) {
        let mut assignment = self.assignment.lock();
        while assignment.is_some() {
            self.released.wait(&mut assignment);
        }
    }
}

impl DecodeState {
    /// Read one chunk from the source into the scanner
    fn pump(&mut self, name: &str) -> bool {
        match self.source.read(&mut self.scratch) {
            Ok(0) => false,
            Ok(n) => {
                let filled = &self.scratch[..n];
                self.scanner.push_bytes(filled);
                true
            }
            Err(e) => {
                warn!("{}: source read failed: {}", name, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{block, pcm, AudioInfo, PlanarFrame, VideoInfo};
    use crate::container::StreamMuxer;
    use crate::source::MemorySource;

    const VIDEO_SERIAL: u32 = 0x100;
    const AUDIO_SERIAL: u32 = 0x200;

    fn test_video_info(fps: u32) -> VideoInfo {
        VideoInfo {
            width: 32,
            height: 24,
            fps_num: fps,
            fps_den: 1,
            granule_shift: 6,
        }
    }

    fn shaded_frame(info: &VideoInfo, index: u32) -> PlanarFrame {
        let mut frame = PlanarFrame::black(info.width, info.height);
        for (i, y) in frame.y.iter_mut().enumerate() {
            *y = (i as u8).wrapping_add(index as u8);
        }
        frame
    }

    /// Author a playable stream: `frames` video frames at `fps`, with a
    /// keyframe every `keyframe_interval` frames, optionally with a
    /// stereo audio track
    fn build_stream(frames: u32, fps: u32, keyframe_interval: u32, with_audio: bool) -> Vec<u8> {
        let info = test_video_info(fps);
        let mut muxer = StreamMuxer::new();
        muxer
            .add_stream(VIDEO_SERIAL, block::encode_header(&info))
            .unwrap();
        let audio_info = AudioInfo {
            channels: 2,
            sample_rate: 8000,
        };
        if with_audio {
            muxer
                .add_stream(AUDIO_SERIAL, pcm::encode_header(&audio_info))
                .unwrap();
        }

        let mut encoder = block::BlockEncoder::new(info.clone(), keyframe_interval).unwrap();
        let samples_per_frame = (audio_info.sample_rate / fps) as usize;
        let mut audio_granule = 0i64;
        for i in 0..frames {
            let (packet, granule) = encoder.encode_frame(&shaded_frame(&info, i)).unwrap();
            muxer.add_packet(VIDEO_SERIAL, packet, granule).unwrap();
            if with_audio {
                let samples: Vec<i16> = (0..samples_per_frame * 2)
                    .map(|k| (k as i16).wrapping_mul(257))
                    .collect();
                audio_granule += samples_per_frame as i64;
                muxer
                    .add_packet(AUDIO_SERIAL, pcm::encode_packet(&samples), audio_granule)
                    .unwrap();
            }
        }
        muxer.finish()
    }

    fn open_clip(data: Vec<u8>, options: OpenOptions) -> VideoClip {
        VideoClip::open(
            Box::new(MemorySource::with_label(data, "test-clip")),
            options,
            &EngineConfig::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_open_parses_headers_and_duration() {
        let clip = open_clip(build_stream(90, 30, 8, false), OpenOptions::default());

        assert_eq!(clip.width(), 32);
        assert_eq!(clip.height(), 24);
        assert_eq!(clip.stride(), 32);
        assert!((clip.fps() - 30.0).abs() < 1e-9);
        assert_eq!(clip.frame_count(), 90);
        assert!((clip.duration().unwrap() - 3.0).abs() < 1e-9);
        assert!(!clip.end_of_stream());
    }

    #[test]
    fn test_open_garbage_fails() {
        let result = VideoClip::open(
            Box::new(MemorySource::new(vec![0xab; 2048])),
            OpenOptions::default(),
            &EngineConfig::default(),
            None,
        );
        assert!(matches!(result, Err(Error::MalformedStream(_))));
    }

    #[test]
    fn test_open_audio_only_stream_fails() {
        let mut muxer = StreamMuxer::new();
        let audio_info = AudioInfo {
            channels: 1,
            sample_rate: 8000,
        };
        muxer
            .add_stream(AUDIO_SERIAL, pcm::encode_header(&audio_info))
            .unwrap();
        muxer
            .add_packet(AUDIO_SERIAL, pcm::encode_packet(&[0i16; 32]), 32)
            .unwrap();
        let data = muxer.finish();

        let result = VideoClip::open(
            Box::new(MemorySource::new(data)),
            OpenOptions::default(),
            &EngineConfig::default(),
            None,
        );
        assert!(matches!(result, Err(Error::MalformedStream(_))));
    }

    #[test]
    fn test_power_of_two_stride() {
        let options = OpenOptions {
            stride_mode: StrideMode::PowerOfTwo,
            ..Default::default()
        };
        let clip = open_clip(build_stream(10, 30, 8, false), options);
        assert_eq!(clip.width(), 32);
        assert_eq!(clip.stride(), 32); // 32 is already a power of two
    }

    #[test]
    fn test_sequential_decode_is_fifo_and_backpressured() {
        let options = OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        };
        let clip = open_clip(build_stream(90, 30, 8, false), options);

        for _ in 0..4 {
            clip.decode_next_frame();
        }
        assert_eq!(clip.ready_frame_count(), 4);

        // queue full: decode must be a silent no-op
        clip.decode_next_frame();
        assert_eq!(clip.ready_frame_count(), 4);

        // display times come out non-decreasing
        let mut last = f64::NEG_INFINITY;
        for _ in 0..4 {
            let meta = clip.queue.front_meta().unwrap();
            assert!(meta.display_time >= last);
            last = meta.display_time;
            clip.queue.pop();
        }
    }

    #[test]
    fn test_get_next_frame_waits_for_display_time() {
        let options = OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        };
        let clip = open_clip(build_stream(30, 30, 8, false), options);
        clip.decode_next_frame();

        // the first frame displays at 1/30s; at time zero it is early
        assert!(clip.get_next_frame().is_none());

        clip.advance(0.1);
        let frame = clip.get_next_frame().expect("frame due");
        assert_eq!(frame.frame_number(), 0);
        assert_eq!(
            frame.data().len(),
            OutputMode::Rgb24.buffer_len(clip.stride(), clip.height())
        );
        drop(frame);
        clip.pop_frame();
        assert_eq!(clip.displayed_frame_count(), 1);
    }

    #[test]
    fn test_stale_frames_dropped_on_consume() {
        let options = OpenOptions {
            precached_frames: Some(8),
            ..Default::default()
        };
        let clip = open_clip(build_stream(90, 30, 8, false), options);
        for _ in 0..6 {
            clip.decode_next_frame();
        }
        assert_eq!(clip.ready_frame_count(), 6);

        // jump the clock far past the queued frames: everything queued
        // is stale, gets auto-popped, and nothing is returned
        clip.advance(0.5);
        assert!(clip.get_next_frame().is_none());
        assert_eq!(clip.ready_frame_count(), 0);
        assert_eq!(clip.dropped_frame_count(), 6);

        // the next decode catches up past the clock and its frame is
        // displayable
        clip.decode_next_frame();
        let frame = clip.get_next_frame().expect("caught-up frame");
        assert!(frame.display_time() >= 0.5 - 0.1 - 1e-9);
    }

    #[test]
    fn test_behind_schedule_frames_predropped_in_decode() {
        let options = OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        };
        let clip = open_clip(build_stream(90, 30, 8, false), options);

        // clock far ahead: decode discards late frames before conversion
        clip.advance(1.0);
        clip.decode_next_frame();
        let meta = clip.queue.front_meta().expect("a frame was committed");
        assert!(meta.display_time >= 1.0);
        assert!(clip.dropped_frame_count() > 0);
    }

    #[test]
    fn test_end_of_stream_and_is_done() {
        let options = OpenOptions {
            precached_frames: Some(16),
            ..Default::default()
        };
        let clip = open_clip(build_stream(10, 30, 4, false), options);

        for _ in 0..11 {
            clip.decode_next_frame();
        }
        assert!(clip.end_of_stream());
        assert_eq!(clip.ready_frame_count(), 10);
        assert!(!clip.is_done());

        clip.advance(10.0);
        while let Some(frame) = clip.get_next_frame() {
            drop(frame);
            clip.pop_frame();
        }
        // whatever was not displayable got dropped by the stale check
        assert!(clip.is_done());
        assert_eq!(
            clip.displayed_frame_count(),
            10,
            "each decoded frame was consumed or dropped exactly once"
        );
    }

    #[test]
    fn test_restart_round_trip() {
        let options = OpenOptions {
            precached_frames: Some(16),
            ..Default::default()
        };
        let clip = open_clip(build_stream(10, 30, 4, false), options);
        for _ in 0..11 {
            clip.decode_next_frame();
        }
        assert!(clip.end_of_stream());

        clip.restart();
        assert_eq!(clip.position(), 0.0);
        assert_eq!(clip.ready_frame_count(), 0);
        assert!(!clip.end_of_stream());

        // decoding resumes from the first frame
        clip.decode_next_frame();
        assert_eq!(clip.queue.front_meta().unwrap().frame_number, 0);
    }

    #[test]
    fn test_seek_lands_near_target() {
        let options = OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        };
        let clip = open_clip(build_stream(90, 30, 8, false), options);

        clip.seek(1.5);
        assert!(clip.has_pending_seek());
        clip.do_seek();
        assert!(!clip.has_pending_seek());

        clip.decode_next_frame();
        let meta = clip.queue.front_meta().expect("frame after seek");
        let interval = 1.0 / 30.0;
        assert!(
            (meta.display_time - 1.5).abs() <= interval + 1e-9,
            "landed at {} for target 1.5",
            meta.display_time
        );
        assert!((clip.position() - 1.5).abs() <= interval + 1e-9);
    }

    #[test]
    fn test_seek_is_idempotent_on_keyframe_boundaries() {
        let options = OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        };
        let clip = open_clip(build_stream(90, 30, 8, false), options);
        let interval = 1.0 / 30.0;

        for _ in 0..2 {
            clip.seek(2.0);
            clip.do_seek();
            clip.decode_next_frame();
            let meta = clip.queue.front_meta().expect("frame after seek");
            assert!(
                (meta.display_time - 2.0).abs() <= interval + 1e-9,
                "landed at {} for target 2.0",
                meta.display_time
            );
            clip.queue.clear();
        }
    }

    #[test]
    fn test_seek_to_zero_is_cheap_restart() {
        let options = OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        };
        let clip = open_clip(build_stream(90, 30, 8, false), options);
        for _ in 0..4 {
            clip.decode_next_frame();
        }

        clip.seek(0.0);
        clip.do_seek();
        assert_eq!(clip.position(), 0.0);
        assert_eq!(clip.ready_frame_count(), 0);

        clip.decode_next_frame();
        assert_eq!(clip.queue.front_meta().unwrap().frame_number, 0);
    }

    #[test]
    fn test_auto_restart_loops_and_flips_iteration() {
        let options = OpenOptions {
            precached_frames: Some(4),
            auto_restart: true,
            ..Default::default()
        };
        // one second of video
        let clip = open_clip(build_stream(30, 30, 8, false), options);

        let dt = 1.0 / 30.0;
        let mut saw_second_iteration = false;
        for _ in 0..120 {
            clip.decode_next_frame();
            clip.advance(dt);
            if let Some(frame) = clip.get_next_frame() {
                if frame.iteration() {
                    saw_second_iteration = true;
                }
                drop(frame);
                clip.pop_frame();
            }
        }

        assert!(saw_second_iteration, "loop boundary never crossed");
        assert!(!clip.end_of_stream(), "auto-restart must not hit EOS");
        assert!(
            clip.position() < 1.0 + dt,
            "clock was re-based at the loop boundary"
        );
    }

    #[test]
    fn test_paused_clip_does_not_advance() {
        let clip = open_clip(build_stream(30, 30, 8, false), OpenOptions::default());
        clip.pause();
        assert!(clip.is_paused());
        clip.advance(1.0);
        assert_eq!(clip.position(), 0.0);

        clip.play();
        clip.advance(0.5);
        assert!((clip.position() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_update_to_next_frame_steps_exactly() {
        let options = OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        };
        let clip = open_clip(build_stream(30, 30, 8, false), options);
        clip.decode_next_frame();

        let jump = clip.update_to_next_frame();
        assert!(jump > 0.0);
        let frame = clip.get_next_frame().expect("frame due after step");
        assert!((frame.display_time() - clip.position()).abs() < 1e-9);
    }

    #[test]
    fn test_set_output_mode_reallocates_queue() {
        let options = OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        };
        let clip = open_clip(build_stream(30, 30, 8, false), options);
        clip.decode_next_frame();
        assert_eq!(clip.ready_frame_count(), 1);

        clip.set_output_mode(OutputMode::Rgba32);
        assert_eq!(clip.output_mode(), OutputMode::Rgba32);
        // ready frames were discarded with the old buffers
        assert_eq!(clip.ready_frame_count(), 0);

        clip.decode_next_frame();
        let frame_len = clip.queue.front().unwrap().data().len();
        assert_eq!(
            frame_len,
            OutputMode::Rgba32.buffer_len(clip.stride(), clip.height())
        );
    }

    #[test]
    fn test_set_precached_frames_resizes() {
        let clip = open_clip(build_stream(30, 30, 8, false), OpenOptions::default());
        assert_eq!(clip.precached_frames(), 8); // engine default
        clip.set_precached_frames(3);
        assert_eq!(clip.precached_frames(), 3);
        for _ in 0..5 {
            clip.decode_next_frame();
        }
        assert_eq!(clip.ready_frame_count(), 3);
    }

    #[test]
    fn test_priority_index_prefers_starved_unpaused_clips() {
        let options = OpenOptions {
            precached_frames: Some(8),
            ..Default::default()
        };
        let starved = open_clip(build_stream(30, 30, 8, false), options.clone());
        let buffered = open_clip(build_stream(30, 30, 8, false), options);

        for _ in 0..3 {
            buffered.decode_next_frame();
        }
        assert!(starved.priority_index() < buffered.priority_index());

        // pausing pushes a clip to the back of the line
        starved.pause();
        assert!(starved.priority_index() > buffered.priority_index());
    }

    #[test]
    fn test_at_most_one_worker_assignment() {
        let clip = open_clip(build_stream(10, 30, 8, false), OpenOptions::default());

        assert!(clip.try_assign(1));
        assert!(!clip.try_assign(2), "second assignment must be refused");
        assert_eq!(clip.assigned_worker(), Some(1));
        assert!(clip.is_busy());

        clip.release_assignment();
        assert_eq!(clip.assigned_worker(), None);
        assert!(clip.try_assign(2));
        clip.release_assignment();
    }

    #[test]
    fn test_assignment_race_has_single_winner() {
        let clip = Arc::new(open_clip(build_stream(10, 30, 8, false), OpenOptions::default()));

        for _ in 0..50 {
            let winners = Arc::new(AtomicU64::new(0));
            let threads: Vec<_> = (0..4)
                .map(|id| {
                    let clip = Arc::clone(&clip);
                    let winners = Arc::clone(&winners);
                    std::thread::spawn(move || {
                        if clip.try_assign(id) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for thread in threads {
                thread.join().unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
            clip.release_assignment();
        }
    }

    mod audio {
        use super::*;
        use crate::audio::{AudioSink, AudioSinkFactory};
        use parking_lot::Mutex as PlMutex;

        struct CollectSink {
            samples: Arc<PlMutex<Vec<f32>>>,
            stopped: Arc<AtomicBool>,
        }

        impl AudioSink for CollectSink {
            fn insert_samples(&mut self, channels: &[Vec<f32>], sample_count: usize) {
                self.samples
                    .lock()
                    .extend_from_slice(&channels[0][..sample_count]);
            }

            fn stop(&mut self) {
                self.stopped.store(true, Ordering::Release);
            }
        }

        struct CollectFactory {
            samples: Arc<PlMutex<Vec<f32>>>,
            stopped: Arc<AtomicBool>,
        }

        impl AudioSinkFactory for CollectFactory {
            fn create_sink(&self, _channels: u32, _sample_rate: u32) -> Box<dyn AudioSink> {
                Box::new(CollectSink {
                    samples: self.samples.clone(),
                    stopped: self.stopped.clone(),
                })
            }
        }

        fn open_with_audio(data: Vec<u8>) -> (VideoClip, Arc<PlMutex<Vec<f32>>>, Arc<AtomicBool>) {
            let samples = Arc::new(PlMutex::new(Vec::new()));
            let stopped = Arc::new(AtomicBool::new(false));
            let factory = CollectFactory {
                samples: samples.clone(),
                stopped: stopped.clone(),
            };
            let clip = VideoClip::open(
                Box::new(MemorySource::with_label(data, "test-audio-clip")),
                OpenOptions {
                    precached_frames: Some(4),
                    ..Default::default()
                },
                &EngineConfig::default(),
                Some(&factory),
            )
            .unwrap();
            (clip, samples, stopped)
        }

        #[test]
        fn test_audio_flushes_to_sink() {
            let (clip, samples, _) = open_with_audio(build_stream(30, 30, 8, true));
            assert!(clip.has_audio());

            clip.decode_next_frame();
            clip.flush_decoded_audio();
            assert!(!samples.lock().is_empty(), "decoded audio reached the sink");
        }

        #[test]
        fn test_audio_gain_attenuates() {
            let (clip, samples, _) = open_with_audio(build_stream(30, 30, 8, true));
            clip.set_audio_gain(0.0);
            assert_eq!(clip.audio_gain(), 0.0);

            clip.decode_next_frame();
            clip.flush_decoded_audio();
            let collected = samples.lock();
            assert!(!collected.is_empty());
            assert!(collected.iter().all(|s| *s == 0.0), "gain 0 silences output");
        }

        #[test]
        fn test_audio_gain_clamped() {
            let (clip, _, _) = open_with_audio(build_stream(10, 30, 8, true));
            clip.set_audio_gain(3.0);
            assert_eq!(clip.audio_gain(), 1.0);
            clip.set_audio_gain(-1.0);
            assert_eq!(clip.audio_gain(), 0.0);
        }

        #[test]
        fn test_paused_clip_does_not_flush_audio() {
            let (clip, samples, _) = open_with_audio(build_stream(30, 30, 8, true));
            clip.decode_next_frame();
            clip.pause();
            clip.flush_decoded_audio();
            assert!(samples.lock().is_empty());
        }

        #[test]
        fn test_shutdown_notifies_sink() {
            let (clip, _, stopped) = open_with_audio(build_stream(10, 30, 8, true));
            clip.shutdown_audio();
            assert!(stopped.load(Ordering::Acquire));
        }

        #[test]
        fn test_no_factory_means_no_audio() {
            let clip = open_clip(build_stream(10, 30, 8, true), OpenOptions::default());
            assert!(!clip.has_audio());
            // decoding still works, audio pages are simply not routed
            clip.decode_next_frame();
            assert_eq!(clip.ready_frame_count(), 1);
        }
    }
}
