//! Display output: per-frame emission policy, conversion and queueing.
//!
//! [`RawOutput`] receives every picture the engine displays, decides whether
//! it is emitted, resolves the output bit depth, converts the picture when
//! the requested output format differs from the decoded one, and pushes the
//! result into its [`FrameQueue`] for the consumer.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use vcu_common::{
    ChromaMode, DecodeError, DecodeResult, FourCC, OutputBitDepth, OutputFormat, PicFormat,
    PlaneMode, StorageMode,
};

use crate::allocator::{BufferAllocator, HeapAllocator};
use crate::buffer::HwBuffer;
use crate::convert::convert_pixmap;
use crate::frame::{Frame, FrameCallback};
use crate::queue::FrameQueue;

/// Default wait used by consumers polling for the next frame.
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Conversion buffers kept for reuse.
const MAX_SPARE_CONVERSION_BUFFERS: usize = 4;

/// Result of [`RawOutput::process`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// The picture is the engine's main (or post-processed) output.
    pub is_main_display: bool,
    /// The configured maximum number of main pictures has been reached.
    pub frame_count_reached: bool,
}

struct OutputState {
    format: OutputFormat,
    bit_depth: OutputBitDepth,
    num_frames: u32,
    max_frames: u32,
    input_fourcc: FourCC,
    has_output: bool,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            format: OutputFormat::Auto,
            bit_depth: OutputBitDepth::Alloc,
            num_frames: 0,
            max_frames: u32::MAX,
            input_fourcc: FourCC::NULL,
            has_output: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion buffer reuse
// ---------------------------------------------------------------------------

/// Spare destination buffers returned by completed converted frames.
#[derive(Default)]
struct ConversionPool {
    spare: Mutex<Vec<Arc<HwBuffer>>>,
}

impl ConversionPool {
    /// A spare buffer of at least `size` bytes nobody else holds.
    fn take(&self, size: usize) -> Option<Arc<HwBuffer>> {
        let mut spare = self.spare.lock();
        let index = spare
            .iter()
            .position(|b| Arc::strong_count(b) == 1 && b.size() >= size)?;
        Some(spare.swap_remove(index))
    }

    fn recycle(&self, buffer: Arc<HwBuffer>) {
        let mut spare = self.spare.lock();
        if spare.len() < MAX_SPARE_CONVERSION_BUFFERS {
            spare.push(buffer);
        }
    }

    fn spare_count(&self) -> usize {
        self.spare.lock().len()
    }
}

fn recycler(pool: Weak<ConversionPool>) -> FrameCallback {
    Box::new(move |frame: &Frame| {
        if let Some(pool) = pool.upgrade() {
            pool.recycle(Arc::clone(frame.buffer()));
        }
    })
}

// ---------------------------------------------------------------------------
// RawOutput
// ---------------------------------------------------------------------------

pub struct RawOutput {
    state: Mutex<OutputState>,
    conversion: Arc<ConversionPool>,
    allocator: Mutex<Arc<dyn BufferAllocator>>,
    queue: FrameQueue,
}

impl RawOutput {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OutputState::default()),
            conversion: Arc::new(ConversionPool::default()),
            allocator: Mutex::new(Arc::new(HeapAllocator::new())),
            queue: FrameQueue::new(),
        }
    }

    /// Allocator for conversion buffers, normally the device's.
    pub fn set_allocator(&self, allocator: Arc<dyn BufferAllocator>) {
        *self.allocator.lock() = allocator;
    }

    /// One-shot setup of the output format, bit depth policy and frame cutoff.
    pub fn configure(&self, format: OutputFormat, bit_depth: OutputBitDepth, max_frames: u32) {
        let mut state = self.state.lock();
        state.format = format;
        state.bit_depth = bit_depth;
        state.max_frames = max_frames;
        state.has_output = true;
    }

    /// When disabled, pictures are counted but never queued.
    pub fn enable_output(&self, enabled: bool) {
        self.state.lock().has_output = enabled;
    }

    pub fn set_return_queue_size(&self, size: usize) {
        self.queue.set_return_queue_size(size);
    }

    /// Route one displayed picture.
    ///
    /// Steps run in a fixed order: role check, cutoff check, buffer check,
    /// shallow copy, bit depth resolution, emission. Only main pictures
    /// below the cutoff are emitted and counted.
    pub fn process(
        &self,
        frame: &Arc<Frame>,
        alloc_bit_depth: u8,
        decoder_exists: bool,
    ) -> DecodeResult<ProcessOutcome> {
        let is_main_display = frame.is_main_output();
        let mut state = self.state.lock();

        if decoder_exists {
            if state.num_frames < state.max_frames {
                if !frame.buffer().has_data() {
                    return Err(DecodeError::InvalidState("data buffer is empty".into()));
                }
                let copy = Frame::create_shallow_copy(frame)?;
                copy.link(Arc::clone(frame));

                let current = frame.bit_depth_y().max(frame.bit_depth_uv());
                match state.bit_depth {
                    OutputBitDepth::First => state.bit_depth = OutputBitDepth::Fixed(current),
                    OutputBitDepth::Alloc => {
                        state.bit_depth = OutputBitDepth::Fixed(alloc_bit_depth)
                    }
                    _ => {}
                }
                let effective = match state.bit_depth {
                    OutputBitDepth::Fixed(bd) => bd,
                    _ => current,
                };

                if state.has_output && is_main_display {
                    self.emit(&mut state, copy, effective)?;
                }
            }
            if is_main_display {
                state.num_frames += 1;
            }
        }

        Ok(ProcessOutcome {
            is_main_display,
            frame_count_reached: state.num_frames >= state.max_frames,
        })
    }

    /// Convert when needed and queue the result.
    fn emit(&self, state: &mut OutputState, frame: Arc<Frame>, bit_depth: u8) -> DecodeResult<()> {
        let bit_depth = even_bit_depth(bit_depth);
        let crop = *frame.crop_info();
        frame.buffer().set_dimension(frame.dimension());

        let source = frame.fourcc();
        let source_format = source.pic_format().ok_or_else(|| {
            DecodeError::InvalidArgument(format!("unknown decoded FourCC {source}"))
        })?;
        let new_input = state.input_fourcc != source;
        state.input_fourcc = source;

        let target = match state.format {
            OutputFormat::Auto => auto_output_fourcc(&source_format, bit_depth).ok_or_else(|| {
                DecodeError::UnsupportedConversion {
                    from: source.to_string(),
                    to: format!("{} {bit_depth}-bit raster", source_format.chroma),
                }
            })?,
            OutputFormat::Native => source,
            OutputFormat::Explicit(fourcc) => fourcc,
        };

        let compressed = frame
            .buffer()
            .pixmap_meta()
            .is_some_and(|m| m.compressed);
        frame.buffer().update_display_info_meta(|m| m.crop = crop);

        if !compressed && target != source {
            if new_input {
                info!(from = %source, to = %target, "Software conversion enabled");
            }
            let converted = self.convert(frame, target)?;
            trace!(buffer = converted.buffer().id(), "Queue converted frame");
            self.queue.enqueue(converted);
        } else {
            trace!(buffer = frame.buffer().id(), "Queue frame");
            self.queue.enqueue(frame);
        }
        Ok(())
    }

    fn convert(&self, frame: Arc<Frame>, target: FourCC) -> DecodeResult<Arc<Frame>> {
        let dim = frame.buffer().dimension();
        let size = Frame::yuv_io_size(dim, target)?;
        let buffer = match self.conversion.take(size) {
            Some(buffer) => buffer,
            None => {
                debug!(size, fourcc = %target, "Allocate conversion buffer");
                let allocator = Arc::clone(&*self.allocator.lock());
                allocator.allocate(size, "conversion buffer")?
            }
        };
        let converted = Frame::create_yuv_io_on(
            buffer,
            dim,
            target,
            Some(frame.crop_info()),
            Some(recycler(Arc::downgrade(&self.conversion))),
        )?;

        convert_pixmap(frame.buffer(), converted.buffer())?;

        let display = frame
            .buffer()
            .display_info_meta()
            .ok_or_else(|| DecodeError::metadata("display info metadata is missing"))?;
        if !converted.buffer().add_display_info_meta(display) {
            return Err(DecodeError::metadata(
                "cloned display info metadata was not added",
            ));
        }

        converted.link(frame);
        Ok(converted)
    }

    pub fn dequeue(&self, timeout: Duration) -> Option<Arc<Frame>> {
        self.queue.dequeue(timeout)
    }

    /// True when no frame is waiting for the consumer.
    pub fn idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every queued frame without delivering it.
    pub fn flush(&self) {
        self.queue.clear();
    }

    pub fn num_frames(&self) -> u32 {
        self.state.lock().num_frames
    }

    /// Bit depth policy after lazy resolution.
    pub fn resolved_bit_depth(&self) -> OutputBitDepth {
        self.state.lock().bit_depth
    }

    pub fn spare_conversion_buffers(&self) -> usize {
        self.conversion.spare_count()
    }
}

impl Default for RawOutput {
    fn default() -> Self {
        Self::new()
    }
}

fn even_bit_depth(bit_depth: u8) -> u8 {
    if bit_depth % 2 != 0 {
        bit_depth + 1
    } else {
        bit_depth
    }
}

/// Raster output format derived from the decoded format.
///
/// MSB-aligned 4:2:0 and 4:2:2 pictures stay semi-planar, everything else
/// becomes planar.
fn auto_output_fourcc(source: &PicFormat, bit_depth: u8) -> Option<FourCC> {
    let semi_planar =
        source.msb && matches!(source.chroma, ChromaMode::Yuv420 | ChromaMode::Yuv422);
    let plane_mode = match source.chroma {
        ChromaMode::Mono => PlaneMode::Monoplane,
        _ if semi_planar => PlaneMode::SemiPlanar,
        _ => PlaneMode::Planar,
    };
    FourCC::from_pic_format(&PicFormat {
        chroma: source.chroma,
        bit_depth,
        storage: StorageMode::Raster,
        plane_mode,
        msb: source.msb && bit_depth > 8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DisplayInfoMeta, PixMapMeta, PixelMemory, PlaneDesc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vcu_common::{CropInfo, Dimension, InfoDecode, OutputRole, PlaneId};

    fn decoded(
        fourcc: &[u8; 4],
        role: OutputRole,
        bit_depth: u8,
        done: &Arc<AtomicUsize>,
    ) -> Arc<Frame> {
        let fourcc = FourCC::from_bytes(fourcc);
        let format = fourcc.pic_format().unwrap();
        let dim = Dimension::new(64, 64);
        let pitch = format.min_pitch(64);
        let mut planes = Vec::new();
        let mut offset = 0;
        for id in format.pixel_planes() {
            let p = if id == PlaneId::Y { pitch } else { format.chroma_pitch(pitch) };
            planes.push(PlaneDesc { id, offset, pitch: p });
            offset += format.plane_alloc_size(id, dim, p);
        }
        let buffer = Arc::new(HwBuffer::new(PixelMemory::new(offset), "dpb"));
        buffer.add_pixmap_meta(PixMapMeta {
            dim,
            fourcc,
            planes,
            compressed: false,
        });
        buffer.add_display_info_meta(DisplayInfoMeta::default());
        let info = InfoDecode {
            dim,
            crop: CropInfo {
                cropping: true,
                bottom: 4,
                ..Default::default()
            },
            bit_depth_y: bit_depth,
            bit_depth_c: bit_depth,
            output_role: role,
            ..Default::default()
        };
        let done = Arc::clone(done);
        Frame::create(
            buffer,
            &info,
            Some(Box::new(move |_: &Frame| {
                done.fetch_add(1, Ordering::SeqCst);
            })),
        )
    }

    fn drain(output: &RawOutput) -> Vec<Arc<Frame>> {
        std::iter::from_fn(|| output.dequeue(Duration::ZERO)).collect()
    }

    // -- cutoff and roles ------------------------------------------------------

    #[test]
    fn cutoff_stops_emission() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(OutputFormat::Native, OutputBitDepth::Stream, 10);

        let mut reached_at = None;
        for i in 1..=12 {
            let frame = decoded(b"NV12", OutputRole::Main, 8, &done);
            let outcome = output.process(&frame, 8, true).unwrap();
            assert!(outcome.is_main_display);
            if outcome.frame_count_reached && reached_at.is_none() {
                reached_at = Some(i);
            }
        }
        assert_eq!(reached_at, Some(10));
        assert_eq!(drain(&output).len(), 10);
    }

    #[test]
    fn secondary_output_is_not_emitted_or_counted() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(OutputFormat::Native, OutputBitDepth::Stream, 10);

        let frame = decoded(b"NV12", OutputRole::Secondary, 8, &done);
        let outcome = output.process(&frame, 8, true).unwrap();
        assert!(!outcome.is_main_display);
        assert!(output.idle());
        assert_eq!(output.num_frames(), 0);

        let post = decoded(b"NV12", OutputRole::PostProcessed, 8, &done);
        assert!(output.process(&post, 8, true).unwrap().is_main_display);
        assert_eq!(output.num_frames(), 1);
    }

    #[test]
    fn without_decoder_nothing_happens() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(OutputFormat::Native, OutputBitDepth::Stream, 1);
        let frame = decoded(b"NV12", OutputRole::Main, 8, &done);
        let outcome = output.process(&frame, 8, false).unwrap();
        assert!(!outcome.frame_count_reached);
        assert!(output.idle());
    }

    // -- bit depth policy ------------------------------------------------------

    #[test]
    fn first_policy_locks_on_first_frame() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(OutputFormat::Native, OutputBitDepth::First, u32::MAX);
        output
            .process(&decoded(b"P010", OutputRole::Main, 10, &done), 8, true)
            .unwrap();
        output
            .process(&decoded(b"NV12", OutputRole::Main, 8, &done), 8, true)
            .unwrap();
        assert_eq!(output.resolved_bit_depth(), OutputBitDepth::Fixed(10));
    }

    #[test]
    fn alloc_policy_takes_engine_depth_once() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(OutputFormat::Native, OutputBitDepth::Alloc, u32::MAX);
        output
            .process(&decoded(b"NV12", OutputRole::Main, 8, &done), 12, true)
            .unwrap();
        output
            .process(&decoded(b"NV12", OutputRole::Main, 8, &done), 8, true)
            .unwrap();
        assert_eq!(output.resolved_bit_depth(), OutputBitDepth::Fixed(12));
    }

    #[test]
    fn stream_policy_stays_per_frame() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(OutputFormat::Auto, OutputBitDepth::Stream, u32::MAX);
        output
            .process(&decoded(b"P010", OutputRole::Main, 10, &done), 8, true)
            .unwrap();
        output
            .process(&decoded(b"NV12", OutputRole::Main, 8, &done), 8, true)
            .unwrap();
        assert_eq!(output.resolved_bit_depth(), OutputBitDepth::Stream);

        let frames = drain(&output);
        // P010 stays P010, NV12 becomes planar I420.
        assert_eq!(frames[0].fourcc(), FourCC::from_bytes(b"P010"));
        assert_eq!(frames[1].fourcc(), FourCC::from_bytes(b"I420"));
    }

    // -- conversion ------------------------------------------------------------

    #[test]
    fn auto_format_selection() {
        let p010 = FourCC::from_bytes(b"P010").pic_format().unwrap();
        let nv12 = FourCC::from_bytes(b"NV12").pic_format().unwrap();
        let y800 = FourCC::from_bytes(b"Y800").pic_format().unwrap();
        assert_eq!(auto_output_fourcc(&p010, 10), Some(FourCC::from_bytes(b"P010")));
        assert_eq!(auto_output_fourcc(&p010, 8), Some(FourCC::from_bytes(b"NV12")));
        assert_eq!(auto_output_fourcc(&nv12, 8), Some(FourCC::from_bytes(b"I420")));
        assert_eq!(auto_output_fourcc(&nv12, 10), Some(FourCC::from_bytes(b"I0AL")));
        assert_eq!(auto_output_fourcc(&y800, 8), Some(FourCC::from_bytes(b"Y800")));
        assert_eq!(even_bit_depth(9), 10);
    }

    #[test]
    fn converted_frame_keeps_source_alive() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(
            OutputFormat::Explicit(FourCC::from_bytes(b"I420")),
            OutputBitDepth::Stream,
            u32::MAX,
        );
        let frame = decoded(b"NV12", OutputRole::Main, 8, &done);
        output.process(&frame, 8, true).unwrap();
        drop(frame);
        assert_eq!(done.load(Ordering::SeqCst), 0);

        let converted = output.dequeue(Duration::ZERO).unwrap();
        assert_eq!(converted.fourcc(), FourCC::from_bytes(b"I420"));
        assert_eq!(converted.crop_info().bottom, 4);
        assert_eq!(
            converted.buffer().display_info_meta().unwrap().crop.bottom,
            4
        );
        drop(converted);
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(output.spare_conversion_buffers(), 1);
    }

    #[test]
    fn conversion_buffers_are_reused() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(
            OutputFormat::Explicit(FourCC::from_bytes(b"I420")),
            OutputBitDepth::Stream,
            u32::MAX,
        );
        output
            .process(&decoded(b"NV12", OutputRole::Main, 8, &done), 8, true)
            .unwrap();
        let first = output.dequeue(Duration::ZERO).unwrap();
        let ptr = first.buffer().data_ptr();
        drop(first);

        output
            .process(&decoded(b"NV12", OutputRole::Main, 8, &done), 8, true)
            .unwrap();
        let second = output.dequeue(Duration::ZERO).unwrap();
        assert_eq!(second.buffer().data_ptr(), ptr);
        assert_eq!(output.spare_conversion_buffers(), 0);
    }

    #[test]
    fn conversion_buffers_come_from_the_allocator() {
        let done = Arc::new(AtomicUsize::new(0));
        let allocator = Arc::new(HeapAllocator::new());
        let output = RawOutput::new();
        output.set_allocator(allocator.clone());
        output.configure(
            OutputFormat::Explicit(FourCC::from_bytes(b"I420")),
            OutputBitDepth::Stream,
            u32::MAX,
        );
        output
            .process(&decoded(b"NV12", OutputRole::Main, 8, &done), 8, true)
            .unwrap();
        let converted = output.dequeue(Duration::ZERO).unwrap();
        assert_eq!(allocator.allocated_bytes(), converted.buffer().size());
    }

    #[test]
    fn exhausted_allocator_fails_conversion() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.set_allocator(Arc::new(HeapAllocator::with_limit(16)));
        output.configure(
            OutputFormat::Explicit(FourCC::from_bytes(b"I420")),
            OutputBitDepth::Stream,
            u32::MAX,
        );
        let frame = decoded(b"NV12", OutputRole::Main, 8, &done);
        assert!(output.process(&frame, 8, true).is_err());
        assert!(output.idle());
    }

    #[test]
    fn native_never_converts() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(OutputFormat::Native, OutputBitDepth::Fixed(10), u32::MAX);
        let frame = decoded(b"NV12", OutputRole::Main, 8, &done);
        let ptr = frame.buffer().data_ptr();
        output.process(&frame, 8, true).unwrap();
        let out = output.dequeue(Duration::ZERO).unwrap();
        assert_eq!(out.buffer().data_ptr(), ptr);
        assert!(out.buffer().is_alias());
    }

    #[test]
    fn flush_releases_frames() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = RawOutput::new();
        output.configure(OutputFormat::Native, OutputBitDepth::Stream, u32::MAX);
        for _ in 0..3 {
            output
                .process(&decoded(b"NV12", OutputRole::Main, 8, &done), 8, true)
                .unwrap();
        }
        assert!(!output.idle());
        output.flush();
        assert!(output.idle());
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }
}
