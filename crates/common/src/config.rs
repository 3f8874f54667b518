//! Configuration for a decode session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DecodeError, DecodeResult};
use crate::fourcc::{FourCC, StorageMode};
use crate::types::Codec;

/// Output pixel format selection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Derive the output format from each picture's source format.
    #[default]
    Auto,
    /// Emit pictures in the decoder's own format, never converting.
    Native,
    /// Convert every picture to this layout.
    Explicit(FourCC),
}

impl OutputFormat {
    pub fn fourcc(self) -> Option<FourCC> {
        match self {
            Self::Explicit(fourcc) => Some(fourcc),
            _ => None,
        }
    }
}

/// Policy used to pick the bit depth of emitted pictures.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputBitDepth {
    /// Bit depth of the first processed picture, kept for the whole stream.
    First,
    /// Bit depth the output pool was allocated with.
    #[default]
    Alloc,
    /// Bit depth of each picture, re-evaluated per picture.
    Stream,
    /// A fixed bit depth (8, 10 or 12).
    Fixed(u8),
}

/// Which engine conditions end the session early.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    /// Only hardware errors stop decoding.
    #[default]
    Error,
    /// Hardware warnings stop decoding too.
    Warning,
}

/// Settings handed to the decode engine when it is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecSettings {
    pub codec: Codec,
    /// Number of pictures the engine decodes in parallel.
    pub stack_size: u32,
    /// Memory layout of the engine's frame buffers.
    pub frame_buffer_storage: StorageMode,
    /// Output settings were customised by the user (forces raster output).
    pub custom_output_format: bool,
}

impl Default for DecSettings {
    fn default() -> Self {
        Self {
            codec: Codec::Hevc,
            stack_size: 5,
            frame_buffer_storage: StorageMode::Raster,
            custom_output_format: true,
        }
    }
}

/// Top-level configuration of one decode session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Compressed input bitstream.
    pub input: PathBuf,
    pub dec_settings: DecSettings,
    pub output_format: OutputFormat,
    pub output_bit_depth: OutputBitDepth,
    /// Stop after this many main-display pictures.
    pub max_frames: u32,
    pub exit_condition: ErrorLevel,
    /// Seconds to wait for the end of decoding; `None` waits forever.
    pub timeout_secs: Option<u64>,
    pub input_buffer_num: u32,
    pub input_buffer_size: usize,
    /// Output buffers kept by the consumer on top of the engine's minimum.
    pub num_buffers_held_by_next_component: u32,
    /// Dequeued pictures kept alive for this many further dequeues.
    pub return_queue_size: usize,
    pub enable_yuv_output: bool,
    /// Zero every output buffer when the pool is created.
    pub force_clean_buffers: bool,
}

pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 32 * 1024;

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            dec_settings: DecSettings::default(),
            output_format: OutputFormat::Auto,
            output_bit_depth: OutputBitDepth::Alloc,
            max_frames: u32::MAX,
            exit_condition: ErrorLevel::Error,
            timeout_secs: None,
            input_buffer_num: 2,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            num_buffers_held_by_next_component: 1,
            return_queue_size: 0,
            enable_yuv_output: true,
            force_clean_buffers: false,
        }
    }
}

impl DecoderConfig {
    pub fn from_json_str(json: &str) -> DecodeResult<Self> {
        serde_json::from_str(json).map_err(|e| DecodeError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> DecodeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn warnings_are_errors(&self) -> bool {
        self.exit_condition == ErrorLevel::Warning
    }

    /// Reject invalid settings and adjust the input buffering to what the
    /// engine needs.
    pub fn validate_and_adjust(&mut self) -> DecodeResult<()> {
        let mut errors = Vec::new();

        if self.dec_settings.stack_size == 0 {
            errors.push("stack size must be at least 1".to_string());
        }
        if self.max_frames == 0 {
            errors.push("max frames must be at least 1".to_string());
        }
        if let OutputBitDepth::Fixed(bd) = self.output_bit_depth {
            if !matches!(bd, 8 | 10 | 12) {
                errors.push(format!("unsupported output bit depth {bd}"));
            }
        }
        if let OutputFormat::Explicit(fourcc) = self.output_format {
            match fourcc.pic_format() {
                None => errors.push(format!("unknown output FourCC {fourcc}")),
                Some(fmt) if fmt.storage.is_tiled() => {
                    errors.push(format!("tiled output FourCC {fourcc} is not supported"))
                }
                Some(_) => {}
            }
        }

        if !errors.is_empty() {
            return Err(DecodeError::InvalidArgument(format!(
                "{} error(s). Invalid settings, please check the parameters: {}",
                errors.len(),
                errors.join("; ")
            )));
        }

        self.input_buffer_num = self.input_buffer_num.max(self.dec_settings.stack_size);
        self.input_buffer_size = self.input_buffer_size.max(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = DecoderConfig::default();
        assert_eq!(cfg.output_bit_depth, OutputBitDepth::Alloc);
        assert_eq!(cfg.input_buffer_size, 32 * 1024);
        assert_eq!(cfg.max_frames, u32::MAX);
        assert!(cfg.timeout().is_none());
        assert!(!cfg.warnings_are_errors());
    }

    #[test]
    fn parse_partial_json() {
        let cfg = DecoderConfig::from_json_str(
            r#"{
                "input": "clip.vsim",
                "output_format": { "explicit": "I420" },
                "output_bit_depth": "stream",
                "exit_condition": "warning",
                "timeout_secs": 3
            }"#,
        )
        .unwrap();
        assert_eq!(
            cfg.output_format,
            OutputFormat::Explicit(FourCC::from_bytes(b"I420"))
        );
        assert_eq!(cfg.output_bit_depth, OutputBitDepth::Stream);
        assert!(cfg.warnings_are_errors());
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(3)));
        assert_eq!(cfg.input_buffer_num, 2);
    }

    #[test]
    fn adjust_raises_input_buffers_to_stack_size() {
        let mut cfg = DecoderConfig {
            input_buffer_size: 0,
            ..Default::default()
        };
        cfg.validate_and_adjust().unwrap();
        assert_eq!(cfg.input_buffer_num, 5);
        assert_eq!(cfg.input_buffer_size, 1);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut cfg = DecoderConfig {
            output_bit_depth: OutputBitDepth::Fixed(9),
            output_format: OutputFormat::Explicit(FourCC::from_bytes(b"ABCD")),
            ..Default::default()
        };
        let err = cfg.validate_and_adjust().unwrap_err();
        assert!(err.to_string().starts_with("Invalid argument: 2 error(s)"));
    }
}
