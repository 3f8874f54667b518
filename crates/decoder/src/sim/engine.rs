//! Software stand-in for the hardware decode engine.
//!
//! [`SimEngine`] decodes the synthetic VSIM bitstream on its own thread and
//! reports through the registered [`EngineEvents`] sink exactly like the
//! hardware does: resolution found, decoded and displayed pictures in lent
//! display buffers, errors, and end of stream after a flush.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn, Span};

use vcu_common::{
    CropInfo, DecSettings, DecodeError, DecodeResult, Dimension, FourCC, HwStatus, InfoDecode,
    OutputRole, PicFormat, PicStruct, PlaneId, Position, StreamSettings,
};

use crate::allocator::{BufferAllocator, HeapAllocator};
use crate::buffer::{BufferId, HwBuffer};
use crate::engine::{DecodeEngine, Device, DisplayEvent, EngineEvents};
use crate::pool::StreamBuffer;
use crate::sim::stream::{Record, SimParser};

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Device opening [`SimEngine`] decoders.
pub struct SimDevice {
    allocator: Arc<dyn BufferAllocator>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(HeapAllocator::new()))
    }

    pub fn with_allocator(allocator: Arc<dyn BufferAllocator>) -> Self {
        Self { allocator }
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for SimDevice {
    fn allocator(&self) -> Arc<dyn BufferAllocator> {
        Arc::clone(&self.allocator)
    }

    fn create_decoder(
        &self,
        settings: &DecSettings,
        events: Weak<dyn EngineEvents>,
    ) -> DecodeResult<Arc<dyn DecodeEngine>> {
        let engine: Arc<dyn DecodeEngine> = SimEngine::spawn(settings, events)?;
        Ok(engine)
    }
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

enum Command {
    Data(StreamBuffer, usize),
    Flush,
}

struct EngineState {
    /// Display buffers lent by the application and not in use.
    free: VecDeque<Arc<HwBuffer>>,
    /// Ids of every buffer currently held by the engine.
    held: HashSet<BufferId>,
    output_format: Option<PicFormat>,
    max_bit_depth: u8,
    last_error: HwStatus,
    decoded: u64,
    destroyed: bool,
}

struct Shared {
    state: Mutex<EngineState>,
    buffer_returned: Condvar,
    events: Weak<dyn EngineEvents>,
    span: Span,
}

impl Shared {
    fn record_status(&self, status: HwStatus) {
        let mut state = self.state.lock();
        // A warning never hides an earlier error.
        if status.is_error() || !state.last_error.is_error() {
            state.last_error = status;
        }
    }

    /// Wait for a free display buffer. `None` once the engine is destroyed.
    fn take_display_buffer(&self) -> Option<Arc<HwBuffer>> {
        let mut state = self.state.lock();
        loop {
            if state.destroyed {
                return None;
            }
            if let Some(buffer) = state.free.pop_front() {
                state.held.remove(&buffer.id());
                return Some(buffer);
            }
            self.buffer_returned.wait(&mut state);
        }
    }

    fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }
}

/// Simulated decode engine.
pub struct SimEngine {
    shared: Arc<Shared>,
    commands: Mutex<Option<Sender<Command>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl SimEngine {
    fn spawn(settings: &DecSettings, events: Weak<dyn EngineEvents>) -> DecodeResult<Arc<Self>> {
        let shared = Arc::new(Shared {
            state: Mutex::new(EngineState {
                free: VecDeque::new(),
                held: HashSet::new(),
                output_format: None,
                max_bit_depth: 8,
                last_error: HwStatus::Success,
                decoded: 0,
                destroyed: false,
            }),
            buffer_returned: Condvar::new(),
            events,
            span: Span::current(),
        });
        let (tx, rx) = unbounded();

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("SimEngine".into())
            .spawn(move || {
                let span = worker.span.clone();
                span.in_scope(|| run(&worker, &rx));
            })
            .map_err(|e| DecodeError::EngineCreation(e.to_string()))?;

        info!(
            codec = settings.codec.display_name(),
            stack_size = settings.stack_size,
            "Simulated decoder created"
        );
        Ok(Arc::new(Self {
            shared,
            commands: Mutex::new(Some(tx)),
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
        }))
    }

    fn send(&self, command: Command) -> bool {
        match self.commands.lock().as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    /// Display buffers currently lent to the engine.
    pub fn held_buffers(&self) -> usize {
        self.shared.state.lock().held.len()
    }
}

impl DecodeEngine for SimEngine {
    fn push_stream_buffer(&self, buffer: StreamBuffer, size: usize) -> bool {
        if self.shared.is_destroyed() {
            return false;
        }
        self.send(Command::Data(buffer, size))
    }

    fn flush(&self) {
        if !self.send(Command::Flush) {
            debug!("Flush ignored, decoder is destroyed");
        }
    }

    fn put_display_picture(&self, buffer: Arc<HwBuffer>) -> bool {
        let mut state = self.shared.state.lock();
        if state.destroyed {
            return true;
        }
        if !state.held.insert(buffer.id()) {
            warn!(buffer = buffer.id(), "Display buffer handed back twice");
            return false;
        }
        trace!(buffer = buffer.id(), "Display buffer returned");
        state.free.push_back(buffer);
        drop(state);
        self.shared.buffer_returned.notify_all();
        true
    }

    fn configure_output_settings(&self, format: &PicFormat) -> bool {
        if FourCC::from_pic_format(format).is_none() {
            return false;
        }
        self.shared.state.lock().output_format = Some(*format);
        true
    }

    fn frame_error(&self, buffer: &HwBuffer) -> HwStatus {
        buffer
            .picture_dec_meta()
            .map_or(HwStatus::Success, |meta| meta.status)
    }

    fn last_error(&self) -> HwStatus {
        self.shared.state.lock().last_error
    }

    fn max_bit_depth(&self) -> u8 {
        self.shared.state.lock().max_bit_depth
    }

    fn destroy(&self) {
        let free = {
            let mut state = self.shared.state.lock();
            state.destroyed = true;
            state.held.clear();
            std::mem::take(&mut state.free)
        };
        self.shared.buffer_returned.notify_all();
        drop(free);
        drop(self.commands.lock().take());

        if thread::current().id() == self.thread_id {
            // The sink dropped the last reference from inside a callback.
            return;
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Simulated decoder thread panicked");
            }
        }
    }
}

impl Drop for SimEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ---------------------------------------------------------------------------
// Decoding thread
// ---------------------------------------------------------------------------

struct Decoder<'a> {
    shared: &'a Shared,
    parser: SimParser,
    stream: Option<(StreamSettings, CropInfo)>,
    failed: bool,
}

fn run(shared: &Shared, commands: &Receiver<Command>) {
    let mut decoder = Decoder {
        shared,
        parser: SimParser::new(),
        stream: None,
        failed: false,
    };

    for command in commands.iter() {
        match command {
            Command::Data(buffer, size) => {
                let len = size.min(buffer.size());
                decoder.parser.feed(&buffer.read()[..len]);
                if let Some(events) = shared.events.upgrade() {
                    events.on_input_parsed(&buffer);
                }
                drop(buffer);
                decoder.drain();
            }
            Command::Flush => {
                decoder.drain();
                if decoder.parser.pending_bytes() > 0 {
                    warn!(
                        bytes = decoder.parser.pending_bytes(),
                        "Truncated record at end of stream"
                    );
                }
                if !shared.is_destroyed() {
                    if let Some(events) = shared.events.upgrade() {
                        events.on_frame_display(DisplayEvent::EndOfStream);
                    }
                }
            }
        }
        if shared.is_destroyed() {
            break;
        }
    }
    debug!("Simulated decoder thread exits");
}

impl Decoder<'_> {
    /// Handle every complete record received so far.
    fn drain(&mut self) {
        while !self.failed && !self.shared.is_destroyed() {
            match self.parser.next_record() {
                Ok(Some(record)) => self.handle(record),
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Bitstream error");
                    self.fail(HwStatus::RequestMalformed);
                }
            }
        }
    }

    fn fail(&mut self, status: HwStatus) {
        self.failed = true;
        self.shared.record_status(status);
        if let Some(events) = self.shared.events.upgrade() {
            events.on_error(status);
        }
    }

    fn handle(&mut self, record: Record) {
        match record {
            Record::Sequence {
                settings,
                crop,
                buffer_number,
            } => {
                self.shared.state.lock().max_bit_depth = settings.bit_depth;
                let Some(events) = self.shared.events.upgrade() else {
                    return;
                };
                match events.on_resolution_found(buffer_number as usize, &settings, &crop) {
                    Ok(()) => self.stream = Some((settings, crop)),
                    Err(e) => {
                        error!(error = %e, "Resolution found callback failed");
                        drop(events);
                        self.fail(HwStatus::NoMemory);
                    }
                }
            }
            Record::Picture {
                status,
                role,
                pic_struct,
            } => self.picture(status, role, pic_struct),
            Record::Release => {
                let Some(buffer) = self.shared.take_display_buffer() else {
                    return;
                };
                if let Some(events) = self.shared.events.upgrade() {
                    events.on_frame_display(DisplayEvent::ReleaseOnly(Arc::clone(&buffer)));
                }
                // The release does not consume the buffer.
                let mut state = self.shared.state.lock();
                if !state.destroyed && state.held.insert(buffer.id()) {
                    state.free.push_front(buffer);
                }
            }
            Record::Error(status) => {
                self.shared.record_status(status);
                if let Some(events) = self.shared.events.upgrade() {
                    events.on_error(status);
                }
            }
        }
    }

    fn picture(&mut self, status: HwStatus, role: OutputRole, pic_struct: PicStruct) {
        let Some((settings, crop)) = self.stream.clone() else {
            warn!("Picture before sequence header, skipped");
            return;
        };
        let Some(buffer) = self.shared.take_display_buffer() else {
            return;
        };
        let (format, index) = {
            let mut state = self.shared.state.lock();
            state.decoded += 1;
            (state.output_format, state.decoded)
        };
        let Some(format) = format else {
            error!("Output settings were never configured");
            self.fail(HwStatus::CmdNotAllowed);
            return;
        };

        paint(&buffer, settings.dim, index);
        buffer.update_picture_dec_meta(|meta| {
            meta.decoded_index = index;
            meta.status = status;
        });
        buffer.update_display_info_meta(|meta| {
            meta.crop = crop;
            meta.pic_struct = pic_struct;
            meta.output_role = role;
            meta.bit_depth_y = settings.bit_depth;
            meta.bit_depth_c = settings.bit_depth;
        });

        let info = InfoDecode {
            dim: settings.dim,
            crop,
            bit_depth_y: settings.bit_depth,
            bit_depth_c: settings.bit_depth,
            chroma: settings.chroma,
            storage_mode: format.storage,
            pic_struct,
            output_role: role,
            position: Position::default(),
            crc: index as u32,
        };

        if !status.is_success() {
            self.shared.record_status(status);
        }
        let Some(events) = self.shared.events.upgrade() else {
            return;
        };
        events.on_frame_decoded(&buffer);
        if !status.is_success() {
            events.on_error(status);
        }
        trace!(buffer = buffer.id(), index, "Display picture");
        events.on_frame_display(DisplayEvent::Frame { buffer, info });
    }
}

/// Deterministic test pattern: a diagonal luma ramp shifted by the picture
/// index, neutral chroma. Written in the layout of the buffer itself, which
/// keeps the pool format across a mid-stream bit depth change.
fn paint(buffer: &HwBuffer, dim: Dimension, index: u64) {
    let Some(pixmap) = buffer.pixmap_meta() else {
        return;
    };
    let Some(format) = pixmap.fourcc.pic_format() else {
        return;
    };
    let mut bytes = buffer.write();
    if format.storage.is_tiled() {
        bytes.fill(index as u8);
        return;
    }

    let max = (1u32 << format.bit_depth) - 1;
    let neutral = 1u32 << (format.bit_depth - 1);
    let bps = format.bytes_per_sample() as usize;
    let shift = if format.msb { 16 - format.bit_depth as u32 } else { 0 };
    let (sx, _) = format.chroma.subsampling();

    for plane in &pixmap.planes {
        let rows = format.plane_rows(plane.id, dim.height);
        let samples = match plane.id {
            PlaneId::Y => dim.width,
            PlaneId::UV => dim.width.div_ceil(sx) * 2,
            PlaneId::U | PlaneId::V => dim.width.div_ceil(sx),
        } as usize;
        for y in 0..rows as usize {
            let start = plane.offset + y * plane.pitch as usize;
            let Some(row) = bytes.get_mut(start..start + samples * bps) else {
                return;
            };
            for (x, sample) in row.chunks_exact_mut(bps).enumerate() {
                let value = if plane.id.is_luma() {
                    (x as u64 + y as u64 + index) as u32 & max
                } else {
                    neutral
                };
                if bps == 1 {
                    sample[0] = value as u8;
                } else {
                    let stored = (value << shift) as u16;
                    sample.copy_from_slice(&stored.to_le_bytes());
                }
            }
        }
    }
}
