//! `vcu-common`: Shared types, formats and errors for the VCU decode pipeline.
//!
//! - **Types**: `Dimension`, `CropInfo`, `InfoDecode`, `StreamSettings`
//! - **Formats**: `FourCC`, `PicFormat` and the FourCC table
//! - **Status**: `HwStatus` (engine success / warning / error codes)
//! - **Errors**: `DecodeError` (thiserror-based)
//! - **Config**: `DecoderConfig`, `OutputFormat`, `OutputBitDepth`

pub mod config;
pub mod error;
pub mod fourcc;
pub mod status;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{DecSettings, DecoderConfig, ErrorLevel, OutputBitDepth, OutputFormat};
pub use error::{DecodeError, DecodeResult};
pub use fourcc::{ChromaMode, FourCC, PicFormat, PlaneId, PlaneMode, StorageMode};
pub use status::HwStatus;
pub use types::{
    round_up, Codec, CropInfo, Dimension, InfoDecode, OutputRole, PicStruct, Position,
    SequenceMode, StreamSettings,
};
