//! Boundary with the decode engine.
//!
//! The engine is an opaque collaborator: it accepts bitstream buffers, owns
//! its own worker threads, and reports back through an [`EngineEvents`]
//! sink. Decoded pictures live in buffers the application lends to the
//! engine with [`DecodeEngine::put_display_picture`].
//!
//! Callback threads:
//! - every [`EngineEvents`] method may be called from an engine thread,
//!   concurrently with the application's own threads
//! - an engine must not hold its own locks while calling into the sink,
//!   since the sink calls back into the engine (buffer hand-back)

use std::sync::{Arc, Weak};

use vcu_common::{
    CropInfo, DecSettings, DecodeResult, HwStatus, InfoDecode, PicFormat, StreamSettings,
};

use crate::allocator::BufferAllocator;
use crate::buffer::HwBuffer;
use crate::pool::StreamBuffer;

/// What the engine reports through [`EngineEvents::on_frame_display`].
#[derive(Debug)]
pub enum DisplayEvent {
    /// A picture ready for display, with its decode information.
    Frame {
        buffer: Arc<HwBuffer>,
        info: InfoDecode,
    },
    /// The engine gives a buffer back without a displayable picture.
    ReleaseOnly(Arc<HwBuffer>),
    /// No more pictures will be displayed.
    EndOfStream,
}

/// Event sink registered with an engine at creation.
pub trait EngineEvents: Send + Sync {
    /// An input buffer was fully parsed.
    fn on_input_parsed(&self, _buffer: &HwBuffer) {}

    /// A picture finished decoding (decode order).
    fn on_frame_decoded(&self, buffer: &Arc<HwBuffer>);

    /// A picture is ready for display (display order).
    fn on_frame_display(&self, event: DisplayEvent);

    /// The stream resolution is known. The sink must lend the engine at
    /// least `buffer_number` display buffers before returning.
    fn on_resolution_found(
        &self,
        buffer_number: usize,
        settings: &StreamSettings,
        crop: &CropInfo,
    ) -> DecodeResult<()>;

    fn on_error(&self, status: HwStatus);

    /// Parsed SEI message.
    fn on_parsed_sei(&self, _payload_type: u32, _payload: &[u8]) {}
}

/// An opened decoder instance.
pub trait DecodeEngine: Send + Sync {
    /// Queue `size` bytes of `buffer` for decoding. Returns `false` if the
    /// engine refused the buffer.
    fn push_stream_buffer(&self, buffer: StreamBuffer, size: usize) -> bool;

    /// Signal end of input; remaining pictures are decoded and displayed,
    /// then [`DisplayEvent::EndOfStream`] is reported.
    fn flush(&self);

    /// Lend a display buffer to the engine. Returns `false` if the engine
    /// already holds this buffer.
    fn put_display_picture(&self, buffer: Arc<HwBuffer>) -> bool;

    /// Ask the engine to output pictures in `format`.
    fn configure_output_settings(&self, format: &PicFormat) -> bool;

    /// Decode status of the picture held by `buffer`.
    fn frame_error(&self, buffer: &HwBuffer) -> HwStatus;

    /// Last error or warning reported by the engine.
    fn last_error(&self) -> HwStatus;

    /// Largest bit depth the engine allocates pictures for.
    fn max_bit_depth(&self) -> u8;

    /// Stop the engine and release every buffer it holds. Idempotent.
    fn destroy(&self);
}

/// Hardware device able to open decoders and allocate their buffers.
pub trait Device: Send + Sync {
    fn allocator(&self) -> Arc<dyn BufferAllocator>;

    fn create_decoder(
        &self,
        settings: &DecSettings,
        events: Weak<dyn EngineEvents>,
    ) -> DecodeResult<Arc<dyn DecodeEngine>>;
}
