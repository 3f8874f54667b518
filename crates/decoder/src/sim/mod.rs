//! Simulated decode engine.
//!
//! Stands in for the hardware decoder so the whole output pipeline can run
//! without a device:
//!
//! - [`SimDevice`] / [`SimEngine`]: engine thread, display buffer
//!   accounting, event reporting
//! - [`SimStreamWriter`] / [`SimParser`]: the synthetic VSIM bitstream

pub mod engine;
pub mod stream;

pub use engine::{SimDevice, SimEngine};
pub use stream::{Record, SimParser, SimStreamWriter};
