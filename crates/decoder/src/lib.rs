//! `vcu-decoder`: Asynchronous output pipeline of the VCU video decoder.
//!
//! Takes pictures the decode engine displays, wraps them into frames,
//! converts them to the requested output layout and queues them for the
//! consumer, while lending the engine its output buffers and handing each
//! buffer back once the consumer is done with it.
//!
//! ## Module Overview
//!
//! - [`context`]: `DecoderContext`: session lifecycle, pool setup, EOS
//! - [`raw_output`]: emission policy, bit depth resolution, conversion
//! - [`queue`]: `FrameQueue` with a return queue
//! - [`frame`]: `Frame`: reference-counted picture with a completion hook
//! - [`buffer`] / [`pool`] / [`allocator`]: picture memory and its metadata
//! - [`convert`]: software pixel format conversion
//! - [`reader`]: bitstream feeder thread
//! - [`engine`]: the engine boundary (`Device`, `DecodeEngine`, `EngineEvents`)
//! - [`sim`]: simulated engine and its synthetic bitstream
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use vcu_common::DecoderConfig;
//! use vcu_decoder::{DecoderContext, SimDevice};
//!
//! let config = DecoderConfig { input: "stream.vsim".into(), ..Default::default() };
//! let ctx = DecoderContext::create(config, Arc::new(SimDevice::new()), None)?;
//! ctx.start()?;
//! loop {
//!     match ctx.next_frame() {
//!         Some(frame) => { /* consume frame.buffer() */ }
//!         None if ctx.eos() || !ctx.running() => break,
//!         None => {}
//!     }
//! }
//! let stats = ctx.join()?;
//! ```

pub mod allocator;
pub mod buffer;
pub mod context;
pub mod convert;
pub mod engine;
pub mod event;
pub mod frame;
pub mod pool;
pub mod queue;
pub mod raw_output;
pub mod reader;
pub mod sim;

// Re-export commonly used items at crate root
pub use allocator::{BufferAllocator, HeapAllocator};
pub use buffer::{BufferId, DisplayInfoMeta, HwBuffer, PictureDecMeta, PixMapMeta, PlaneDesc};
pub use context::{DecodeStatistics, DecoderContext, PoolInfo};
pub use engine::{DecodeEngine, Device, DisplayEvent, EngineEvents};
pub use event::ExitEvent;
pub use frame::{Frame, FrameCallback, RawInfo};
pub use pool::{BufPool, PicturePool, StreamBuffer};
pub use queue::FrameQueue;
pub use raw_output::{ProcessOutcome, RawOutput, DEFAULT_DEQUEUE_TIMEOUT};
pub use reader::{FileReader, Reader};
pub use sim::{SimDevice, SimEngine, SimStreamWriter};
