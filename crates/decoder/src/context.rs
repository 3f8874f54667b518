//! Decode session orchestration.
//!
//! [`DecoderContext`] owns one decode session: it creates the engine, lends
//! it the output picture pool once the stream resolution is known, routes
//! displayed pictures through [`RawOutput`], and drives the worker thread
//! that feeds input and waits for the end of decoding.
//!
//! ## Run state
//!
//! `not started → running → awaiting EOS → EOS`. Every transition, the
//! buffer hand-back gate and the pool setup happen under the display lock.
//!
//! ## Locks
//!
//! The display lock and the output queue lock are never held together.
//! Engine deliveries are serialized by a separate delivery lock held across
//! [`RawOutput::process`]; the display lock is only taken for short state
//! updates around it. EOS is declared by whichever side, engine delivery or
//! frame completion, observes an idle queue after the other has published
//! its last change, so exactly one of them sees both conditions.
//!
//! ## Shutdown
//!
//! Buffer hand-back is disabled before the engine is destroyed, so a frame
//! dropped late on the consumer thread never reaches a torn-down engine.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, info_span, trace, warn, Span};

use vcu_common::{
    CropInfo, DecSettings, DecodeError, DecodeResult, DecoderConfig, Dimension, FourCC, HwStatus,
    PicFormat, PlaneMode, StorageMode, StreamSettings,
};

use crate::allocator::BufferAllocator;
use crate::buffer::{DisplayInfoMeta, HwBuffer, PictureDecMeta, PlaneDesc};
use crate::engine::{DecodeEngine, Device, DisplayEvent, EngineEvents};
use crate::event::ExitEvent;
use crate::frame::Frame;
use crate::pool::{BufPool, PicturePool};
use crate::raw_output::{RawOutput, DEFAULT_DEQUEUE_TIMEOUT};
use crate::reader::{FileReader, Reader};

/// Output pictures are sized for the largest LCU so a resolution change
/// within the same LCU grid reuses the pool.
const LCU_SIZE: u32 = 64;

const OUTPUT_POOL_NAME: &str = "decoded picture buffer";
const INPUT_POOL_NAME: &str = "input_pool";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Summary of a finished decode session.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DecodeStatistics {
    pub duration: Duration,
    pub decoded_frames: u32,
    pub concealed_frames: u32,
    /// The session ended because the configured timeout elapsed.
    pub timeout_occurred: bool,
}

impl DecodeStatistics {
    pub fn frame_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.decoded_frames as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for DecodeStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = if self.timeout_occurred {
            "TIMEOUT = "
        } else {
            "Decoded time = "
        };
        write!(
            f,
            "{guard}{:.4} s;  Decoding FrameRate ~ {:.4} Fps; Frame(s) conceal = {}",
            self.duration.as_secs_f64(),
            self.frame_rate(),
            self.concealed_frames
        )
    }
}

/// Layout of the output picture pool.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolInfo {
    pub dim: Dimension,
    pub fourcc: FourCC,
    pub buffer_count: usize,
    pub buffer_size: usize,
}

// ---------------------------------------------------------------------------
// Shared session state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DisplayState {
    await_eos: bool,
    eos: bool,
    /// Buffers of dropped frames go back to the engine.
    push_back: bool,
    concealed_frames: u32,
    /// First fatal error raised where it could not be returned.
    fatal: Option<DecodeError>,
    stream_info: Option<String>,
    statistics: Option<DecodeStatistics>,
}

enum InputSource {
    Path(PathBuf),
    Stream(Box<dyn Read + Send>),
}

struct ContextInner {
    config: DecoderConfig,
    allocator: Arc<dyn BufferAllocator>,
    raw_output: Arc<RawOutput>,
    pool: PicturePool,
    display: Mutex<DisplayState>,
    /// Serializes engine display deliveries.
    delivery: Mutex<()>,
    engine: RwLock<Option<Arc<dyn DecodeEngine>>>,
    exit: ExitEvent,
    running: AtomicBool,
    decoded_frames: AtomicU32,
    span: Span,
    self_ref: Weak<ContextInner>,
}

fn record_fatal(display: &mut DisplayState, exit: &ExitEvent, error: DecodeError) {
    error!(error = %error, "Fatal decoder error");
    if display.fatal.is_none() {
        display.fatal = Some(error);
    }
    exit.set();
}

impl ContextInner {
    fn engine(&self) -> Option<Arc<dyn DecodeEngine>> {
        self.engine.read().clone()
    }

    fn stop_sending_buffer(&self) {
        self.display.lock().push_back = false;
    }

    fn finish(&self) {
        // A delivery already past its await_eos check must land before the flush.
        let _delivery = self.delivery.lock();
        self.display.lock().await_eos = true;
        self.raw_output.flush();
        self.exit.set();
    }

    /// Route one display event. `None` marks the end of the stream.
    fn receive_frame_to_display_from(&self, frame: Option<Arc<Frame>>) {
        let _delivery = self.delivery.lock();
        let (mut last, push_back) = {
            let display = self.display.lock();
            (frame.is_none() || display.await_eos, display.push_back)
        };

        let mut concealed = false;
        if let (false, Some(frame)) = (last, frame.as_ref()) {
            let engine = self.engine();
            let status = engine
                .as_ref()
                .map_or(HwStatus::Success, |e| e.frame_error(frame.buffer()));

            if status.is_error() {
                error!(%status, buffer = frame.buffer().id(), "Picture decoded with error");
                last = true;
            } else {
                if status.is_warning() {
                    warn!(%status, buffer = frame.buffer().id(), "Picture decoded with warning");
                }
                let alloc_bit_depth = engine.as_ref().map_or(8, |e| e.max_bit_depth());
                match self
                    .raw_output
                    .process(frame, alloc_bit_depth, engine.is_some())
                {
                    Ok(outcome) => {
                        last = outcome.frame_count_reached;
                        concealed = outcome.is_main_display
                            && push_back
                            && !last
                            && status.is_concealment();
                    }
                    Err(e) => {
                        record_fatal(&mut self.display.lock(), &self.exit, e);
                        last = true;
                    }
                }
            }
        }

        {
            let mut display = self.display.lock();
            if concealed {
                display.concealed_frames += 1;
            }
            if last && !display.await_eos {
                debug!("Last picture received, awaiting end of stream");
                display.await_eos = true;
            }
        }
        if last {
            self.declare_eos_if_drained();
        }
    }

    /// Completion of an engine frame: hand the buffer back while decoding
    /// goes on, declare EOS once the queue has drained.
    fn frame_done(&self, frame: &Frame) {
        {
            let mut display = self.display.lock();
            if frame.is_main_output() && display.push_back && !display.await_eos {
                if let Some(engine) = self.engine() {
                    trace!(buffer = frame.buffer().id(), "Hand buffer back to decoder");
                    if !engine.put_display_picture(Arc::clone(frame.buffer())) {
                        record_fatal(
                            &mut display,
                            &self.exit,
                            DecodeError::accounting(
                                "failed to put display picture back to decoder",
                            ),
                        );
                    }
                }
            }
            if display.eos || !display.await_eos {
                return;
            }
        }
        self.declare_eos_if_drained();
    }

    fn declare_eos_if_drained(&self) {
        if !self.raw_output.idle() {
            return;
        }
        let mut display = self.display.lock();
        if display.await_eos && !display.eos {
            debug!("Output drained, end of stream");
            display.eos = true;
            self.exit.set();
        }
    }

    fn setup_base_decoder_pool(
        &self,
        display: &mut DisplayState,
        buffer_number: usize,
        settings: &StreamSettings,
        crop: &CropInfo,
    ) -> DecodeResult<()> {
        let engine = self
            .engine()
            .ok_or_else(|| DecodeError::InvalidState("decoder is destroyed".into()))?;

        let format = output_pic_format(settings, &self.config.dec_settings);
        if !engine.configure_output_settings(&format) {
            return Err(DecodeError::InvalidState(
                "could not configure the output settings".into(),
            ));
        }
        let fourcc = FourCC::from_pic_format(&format).ok_or_else(|| {
            DecodeError::InvalidArgument(format!("no FourCC for output format {format:?}"))
        })?;

        let dim = settings.dim.round_up(LCU_SIZE);
        let (size, planes) = pool_layout(&format, dim);
        self.pool.set_format(dim, fourcc);
        self.pool.add_chunk(size, planes);

        let text = render_stream_info(buffer_number, size, settings, crop, fourcc);
        info!(
            resolution = %settings.dim,
            %fourcc,
            profile = settings.profile_idc,
            bit_depth = format.bit_depth,
            sequence = %settings.sequence_mode,
            buffers = buffer_number,
            size,
            "Stream info"
        );
        display.stream_info = Some(text);

        if self.pool.is_init() {
            return Ok(());
        }

        let count = buffer_number + self.config.num_buffers_held_by_next_component as usize;
        self.pool
            .init(self.allocator.as_ref(), count, OUTPUT_POOL_NAME)?;

        for _ in 0..count {
            let buffer = self.pool.get_shared_buffer().ok_or_else(|| {
                DecodeError::InvalidState("no free buffer in the decoded picture pool".into())
            })?;
            if self.config.force_clean_buffers {
                buffer.cleanup();
            }
            if !buffer.add_picture_dec_meta(PictureDecMeta::default())
                || !buffer.add_display_info_meta(DisplayInfoMeta::default())
            {
                return Err(DecodeError::metadata(
                    "could not attach metadata to a decoded picture buffer",
                ));
            }
            if !engine.put_display_picture(buffer) {
                return Err(DecodeError::accounting(
                    "decoder refused a new display buffer",
                ));
            }
        }
        debug!(count, "Output pool handed to decoder");
        Ok(())
    }

    fn manage_error(&self, status: HwStatus) {
        if status.is_error() {
            error!(%status, "Decoder error");
        } else {
            warn!(%status, "Decoder warning");
        }
        if status.is_error() || self.config.warnings_are_errors() {
            self.exit.set();
        }
    }

    // -- worker --------------------------------------------------------------

    fn run(self: Arc<Self>, input: InputSource) -> DecodeResult<DecodeStatistics> {
        let _entered = self.span.enter();
        let config = &self.config;

        let input_pool = BufPool::new(
            self.allocator.as_ref(),
            config.input_buffer_num as usize,
            config.input_buffer_size,
            INPUT_POOL_NAME,
        )?;

        let _teardown = Teardown { ctx: &self };
        let engine = self
            .engine()
            .ok_or_else(|| DecodeError::InvalidState("decoder is destroyed".into()))?;

        let begin = Instant::now();
        let timeout_occurred;
        {
            input_pool.commit();

            let mut reader = FileReader::new(engine, Arc::clone(&input_pool), self.exit.clone());
            match input {
                InputSource::Path(path) => reader.set_path(&path)?,
                InputSource::Stream(stream) => reader.set_input(stream),
            }
            reader.start()?;

            timeout_occurred = !self.exit.wait(config.timeout());

            reader.stop();
            input_pool.decommit();
            if let Err(e) = reader.join() {
                record_fatal(&mut self.display.lock(), &self.exit, e);
            }
        }
        let duration = begin.elapsed();

        // Pictures displayed from here on are not delivered.
        self.display.lock().await_eos = true;
        let drained = self.raw_output.idle();
        let mut display = self.display.lock();

        if let Some(error) = display.fatal.take() {
            return Err(error);
        }

        let status = self
            .engine()
            .map_or(HwStatus::Success, |e| e.last_error());
        if let Some(error) = DecodeError::from_status(status, config.warnings_are_errors()) {
            return Err(error);
        }
        if status.is_warning() {
            warn!(%status, "Decoding finished with a warning");
        }

        let decoded_frames = self.decoded_frames.load(Ordering::SeqCst);
        if decoded_frames == 0 {
            return Err(DecodeError::NoFrameDecoded);
        }

        let statistics = DecodeStatistics {
            duration,
            decoded_frames,
            concealed_frames: display.concealed_frames,
            timeout_occurred,
        };
        info!(
            duration_secs = duration.as_secs_f64(),
            decoded_frames,
            concealed_frames = statistics.concealed_frames,
            timeout = timeout_occurred,
            "{statistics}"
        );
        display.statistics = Some(statistics);
        // Otherwise the last frame completion declares it.
        if drained {
            display.eos = true;
        }
        Ok(statistics)
    }
}

/// Disables buffer hand-back, then destroys the engine.
struct Teardown<'a> {
    ctx: &'a ContextInner,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.ctx.stop_sending_buffer();
        let engine = self.ctx.engine.write().take();
        if let Some(engine) = engine {
            engine.destroy();
        }
    }
}

impl EngineEvents for ContextInner {
    fn on_frame_decoded(&self, _buffer: &Arc<HwBuffer>) {
        if self.engine.read().is_some() {
            self.decoded_frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_frame_display(&self, event: DisplayEvent) {
        let _entered = self.span.enter();
        match event {
            DisplayEvent::ReleaseOnly(buffer) => {
                trace!(buffer = buffer.id(), "Release-only display event ignored");
            }
            DisplayEvent::EndOfStream => self.receive_frame_to_display_from(None),
            DisplayEvent::Frame { buffer, info } => {
                let ctx = self.self_ref.clone();
                let frame = Frame::create(
                    buffer,
                    &info,
                    Some(Box::new(move |f: &Frame| {
                        if let Some(ctx) = ctx.upgrade() {
                            ctx.frame_done(f);
                        }
                    })),
                );
                frame.invalidate();
                self.receive_frame_to_display_from(Some(frame));
            }
        }
    }

    fn on_resolution_found(
        &self,
        buffer_number: usize,
        settings: &StreamSettings,
        crop: &CropInfo,
    ) -> DecodeResult<()> {
        let _entered = self.span.enter();
        let mut display = self.display.lock();
        match self.setup_base_decoder_pool(&mut display, buffer_number, settings, crop) {
            Ok(()) => Ok(()),
            Err(e) => {
                let summary = e.to_string();
                record_fatal(&mut display, &self.exit, e);
                Err(DecodeError::InvalidState(format!(
                    "output pool setup failed: {summary}"
                )))
            }
        }
    }

    fn on_error(&self, status: HwStatus) {
        let _entered = self.span.enter();
        self.manage_error(status);
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // Never started: nobody else tears the engine down.
        let engine = self.engine.get_mut().take();
        if let Some(engine) = engine {
            engine.destroy();
        }
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// One decode session.
pub struct DecoderContext {
    inner: Arc<ContextInner>,
    worker: Mutex<Option<JoinHandle<DecodeResult<DecodeStatistics>>>>,
}

impl DecoderContext {
    /// Validate `config`, configure the output and open the decoder.
    ///
    /// `raw_output` lets the caller share the output queue; a fresh one is
    /// created otherwise.
    pub fn create(
        mut config: DecoderConfig,
        device: Arc<dyn Device>,
        raw_output: Option<Arc<RawOutput>>,
    ) -> DecodeResult<Self> {
        config.validate_and_adjust()?;

        let raw_output = raw_output.unwrap_or_default();
        raw_output.configure(config.output_format, config.output_bit_depth, config.max_frames);
        raw_output.set_return_queue_size(config.return_queue_size);
        raw_output.enable_output(config.enable_yuv_output);
        let allocator = device.allocator();
        raw_output.set_allocator(Arc::clone(&allocator));

        let span = info_span!(
            "vcu_decoder",
            session = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
        );
        let inner = Arc::new_cyclic(|weak| ContextInner {
            config,
            allocator,
            raw_output,
            pool: PicturePool::new(),
            display: Mutex::new(DisplayState {
                push_back: true,
                ..Default::default()
            }),
            delivery: Mutex::new(()),
            engine: RwLock::new(None),
            exit: ExitEvent::new(),
            running: AtomicBool::new(false),
            decoded_frames: AtomicU32::new(0),
            span,
            self_ref: weak.clone(),
        });

        let weak: Weak<ContextInner> = Arc::downgrade(&inner);
        let events: Weak<dyn EngineEvents> = weak;
        let engine = inner
            .span
            .in_scope(|| device.create_decoder(&inner.config.dec_settings, events))?;
        *inner.engine.write() = Some(engine);

        Ok(Self {
            inner,
            worker: Mutex::new(None),
        })
    }

    /// Start decoding the configured input file.
    pub fn start(&self) -> DecodeResult<()> {
        let path = self.inner.config.input.clone();
        self.spawn_worker(InputSource::Path(path))
    }

    /// Start decoding from an in-memory or custom byte source.
    pub fn start_from(&self, input: impl Read + Send + 'static) -> DecodeResult<()> {
        self.spawn_worker(InputSource::Stream(Box::new(input)))
    }

    fn spawn_worker(&self, input: InputSource) -> DecodeResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.inner.running.load(Ordering::SeqCst) {
            return Err(DecodeError::InvalidState("decoder already started".into()));
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("CtrlswDecRun".into())
            .spawn(move || {
                let result = Arc::clone(&inner).run(input);
                inner.running.store(false, Ordering::SeqCst);
                result
            });
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop early: frames still queued are dropped and the worker is woken.
    pub fn finish(&self) {
        self.inner.finish();
    }

    /// Wait for the worker thread and return the session outcome.
    pub fn join(&self) -> DecodeResult<DecodeStatistics> {
        let handle = self.worker.lock().take().ok_or_else(|| {
            DecodeError::InvalidState("decoder not started or already joined".into())
        })?;
        handle
            .join()
            .map_err(|_| DecodeError::InvalidState("decoder worker panicked".into()))?
    }

    pub fn running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn eos(&self) -> bool {
        self.inner.display.lock().eos
    }

    /// Next frame in display order, waiting up to `timeout`.
    pub fn dequeue(&self, timeout: Duration) -> Option<Arc<Frame>> {
        self.inner.raw_output.dequeue(timeout)
    }

    /// [`dequeue`](Self::dequeue) with the default wait.
    pub fn next_frame(&self) -> Option<Arc<Frame>> {
        self.dequeue(DEFAULT_DEQUEUE_TIMEOUT)
    }

    pub fn num_decoded_frames(&self) -> u32 {
        self.inner.decoded_frames.load(Ordering::SeqCst)
    }

    pub fn num_concealed_frames(&self) -> u32 {
        self.inner.display.lock().concealed_frames
    }

    /// Description of the stream, once its resolution is known.
    pub fn stream_info(&self) -> Option<String> {
        self.inner.display.lock().stream_info.clone()
    }

    /// Statistics of a successfully finished session.
    pub fn statistics(&self) -> Option<DecodeStatistics> {
        self.inner.display.lock().statistics
    }

    pub fn output_pool(&self) -> PoolInfo {
        let pool = &self.inner.pool;
        PoolInfo {
            dim: pool.dimension(),
            fourcc: pool.fourcc(),
            buffer_count: pool.buffer_count(),
            buffer_size: pool.buffer_size(),
        }
    }

    pub fn raw_output(&self) -> &Arc<RawOutput> {
        &self.inner.raw_output
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.inner.config
    }
}

impl Drop for DecoderContext {
    fn drop(&mut self) {
        let handle = self.worker.get_mut().take();
        if let Some(handle) = handle {
            self.inner.finish();
            match handle.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(error = %e, "Decoder worker ended with an error"),
                Err(_) => error!("Decoder worker panicked"),
            }
        }
        let mut display = self.inner.display.lock();
        display.await_eos = true;
        display.eos = true;
    }
}

impl fmt::Debug for DecoderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderContext")
            .field("running", &self.running())
            .field("eos", &self.eos())
            .field("decoded_frames", &self.num_decoded_frames())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Picture format the engine is asked to output for `settings`.
fn output_pic_format(settings: &StreamSettings, dec_settings: &DecSettings) -> PicFormat {
    let chroma = settings.chroma;
    let plane_mode = chroma.internal_plane_mode();
    let storage = if dec_settings.custom_output_format {
        StorageMode::Raster
    } else {
        dec_settings.frame_buffer_storage
    };
    PicFormat {
        chroma,
        bit_depth: settings.bit_depth,
        storage,
        plane_mode,
        msb: settings.bit_depth > 8
            && plane_mode == PlaneMode::SemiPlanar
            && !storage.is_tiled(),
    }
}

/// Buffer size and plane layout of one output picture.
fn pool_layout(format: &PicFormat, dim: Dimension) -> (usize, Vec<PlaneDesc>) {
    let pitch_y = format.min_pitch(dim.width);
    let mut planes = Vec::new();
    let mut offset = 0;
    for id in format.pixel_planes() {
        let pitch = if id.is_luma() {
            pitch_y
        } else {
            format.chroma_pitch(pitch_y)
        };
        planes.push(PlaneDesc { id, offset, pitch });
        offset += format.plane_alloc_size(id, dim, pitch);
    }
    (offset, planes)
}

fn render_stream_info(
    buffer_number: usize,
    buffer_size: usize,
    settings: &StreamSettings,
    crop: &CropInfo,
    fourcc: FourCC,
) -> String {
    let dim = settings.dim;
    let mut lines = vec![
        format!("Resolution: {dim}"),
        format!("FourCC: {fourcc}"),
        format!("Profile: {}", settings.profile_idc),
    ];
    if let Some(level) = settings.level {
        lines.push(format!("Level: {level}"));
    }
    lines.push(format!("Bitdepth: {}", fourcc.bit_depth().unwrap_or(settings.bit_depth)));
    if crop.needs_cropping() {
        lines.push(format!("Crop top: {}", crop.top));
        lines.push(format!("Crop bottom: {}", crop.bottom));
        lines.push(format!("Crop left: {}", crop.left));
        lines.push(format!("Crop right: {}", crop.right));
        lines.push(format!("Display resolution: {}", crop.display_dimension(dim)));
    }
    lines.push(format!("Sequence picture: {}", settings.sequence_mode));
    lines.push(format!("Buffers needed: {buffer_number} of size {buffer_size}"));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcu_common::{ChromaMode, SequenceMode};

    fn settings(width: u32, height: u32, chroma: ChromaMode, bit_depth: u8) -> StreamSettings {
        StreamSettings {
            dim: Dimension::new(width, height),
            chroma,
            bit_depth,
            profile_idc: 1,
            level: Some(51),
            sequence_mode: SequenceMode::Progressive,
        }
    }

    #[test]
    fn output_format_follows_stream() {
        let dec = DecSettings::default();
        let nv12 = output_pic_format(&settings(64, 64, ChromaMode::Yuv420, 8), &dec);
        assert_eq!(FourCC::from_pic_format(&nv12), Some(FourCC::from_bytes(b"NV12")));

        let p010 = output_pic_format(&settings(64, 64, ChromaMode::Yuv420, 10), &dec);
        assert_eq!(FourCC::from_pic_format(&p010), Some(FourCC::from_bytes(b"P010")));

        let i4al = output_pic_format(&settings(64, 64, ChromaMode::Yuv444, 10), &dec);
        assert_eq!(FourCC::from_pic_format(&i4al), Some(FourCC::from_bytes(b"I4AL")));

        let mono = output_pic_format(&settings(64, 64, ChromaMode::Mono, 8), &dec);
        assert_eq!(FourCC::from_pic_format(&mono), Some(FourCC::from_bytes(b"Y800")));
    }

    #[test]
    fn engine_storage_used_without_custom_format() {
        let dec = DecSettings {
            custom_output_format: false,
            frame_buffer_storage: StorageMode::Tile64x4,
            ..Default::default()
        };
        let tiled = output_pic_format(&settings(64, 64, ChromaMode::Yuv420, 10), &dec);
        assert_eq!(FourCC::from_pic_format(&tiled), Some(FourCC::from_bytes(b"T60A")));
    }

    #[test]
    fn pool_layout_for_1080p() {
        let format = FourCC::from_bytes(b"NV12").pic_format().unwrap();
        let dim = Dimension::new(1920, 1080).round_up(LCU_SIZE);
        let (size, planes) = pool_layout(&format, dim);
        assert_eq!(dim, Dimension::new(1920, 1088));
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[1].offset, 1920 * 1088);
        assert_eq!(size, 1920 * 1088 * 3 / 2);
    }

    #[test]
    fn stream_info_lists_crop() {
        let crop = CropInfo {
            cropping: true,
            bottom: 8,
            ..Default::default()
        };
        let text = render_stream_info(
            4,
            1000,
            &settings(1920, 1088, ChromaMode::Yuv420, 8),
            &crop,
            FourCC::from_bytes(b"NV12"),
        );
        assert!(text.contains("Resolution: 1920x1088"));
        assert!(text.contains("Level: 51"));
        assert!(text.contains("Display resolution: 1920x1080"));
        assert!(text.ends_with("Buffers needed: 4 of size 1000"));
    }

    #[test]
    fn statistics_summary_line() {
        let stats = DecodeStatistics {
            duration: Duration::from_secs(2),
            decoded_frames: 50,
            concealed_frames: 1,
            timeout_occurred: false,
        };
        assert_eq!(
            stats.to_string(),
            "Decoded time = 2.0000 s;  Decoding FrameRate ~ 25.0000 Fps; Frame(s) conceal = 1"
        );
        let timed_out = DecodeStatistics {
            timeout_occurred: true,
            ..stats
        };
        assert!(timed_out.to_string().starts_with("TIMEOUT = "));
    }
}
