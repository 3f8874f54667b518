//! Core value types shared by the engine boundary and the output pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fourcc::{ChromaMode, StorageMode};

/// Picture dimension in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Dimension {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round both axes up to a multiple of `align`.
    pub fn round_up(self, align: u32) -> Self {
        Self {
            width: round_up(self.width, align),
            height: round_up(self.height, align),
        }
    }

    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Round `value` up to the next multiple of `align` (`align` > 0).
pub fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Top-left position of the picture inside its buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

/// Crop window expressed as offsets from each edge of the decoded picture.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropInfo {
    pub cropping: bool,
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropInfo {
    /// Whether applying the crop changes the displayed area.
    pub fn needs_cropping(&self) -> bool {
        self.cropping && (self.left | self.right | self.top | self.bottom) != 0
    }

    /// Displayed size after applying the crop to `dim`.
    pub fn display_dimension(&self, dim: Dimension) -> Dimension {
        if !self.cropping {
            return dim;
        }
        Dimension {
            width: dim.width.saturating_sub(self.left + self.right),
            height: dim.height.saturating_sub(self.top + self.bottom),
        }
    }
}

/// Picture structure of a decoded picture (frame or field layout).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PicStruct {
    #[default]
    Frame,
    TopField,
    BottomField,
    TopBottom,
    BottomTop,
    TopBottomTop,
    BottomTopBottom,
    FrameDoubling,
    FrameTripling,
}

impl PicStruct {
    /// Decode the engine's numeric picture-structure tag.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Frame,
            1 => Self::TopField,
            2 => Self::BottomField,
            3 => Self::TopBottom,
            4 => Self::BottomTop,
            5 => Self::TopBottomTop,
            6 => Self::BottomTopBottom,
            7 => Self::FrameDoubling,
            8 => Self::FrameTripling,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Which decoder output produced a picture.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputRole {
    /// Primary reconstructed output.
    #[default]
    Main,
    /// Post-processed variant of the primary output (still displayable).
    PostProcessed,
    /// Auxiliary output that never reaches the display queue as a main frame.
    Secondary,
}

impl OutputRole {
    /// Main and post-processed outputs both count as the displayable picture.
    pub fn is_main(self) -> bool {
        matches!(self, Self::Main | Self::PostProcessed)
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Main),
            1 => Some(Self::PostProcessed),
            2 => Some(Self::Secondary),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Scan structure of the whole sequence.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceMode {
    #[default]
    Unknown,
    Progressive,
    Interlaced,
}

impl SequenceMode {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Progressive,
            2 => Self::Interlaced,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SequenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Progressive => "progressive",
            Self::Interlaced => "interlaced",
        })
    }
}

/// Compressed video standard handled by the engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Avc,
    #[default]
    Hevc,
    Jpeg,
}

impl Codec {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Avc => "AVC",
            Self::Hevc => "HEVC",
            Self::Jpeg => "JPEG",
        }
    }
}

/// Stream parameters reported by the engine once the sequence header is parsed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub dim: Dimension,
    pub chroma: ChromaMode,
    pub bit_depth: u8,
    /// Profile IDC as signalled in the stream.
    pub profile_idc: u8,
    /// `None` when the stream carries no level indication.
    pub level: Option<u8>,
    pub sequence_mode: SequenceMode,
}

/// Per-picture decode information delivered with every displayed buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfoDecode {
    pub dim: Dimension,
    pub crop: CropInfo,
    pub bit_depth_y: u8,
    pub bit_depth_c: u8,
    pub chroma: ChromaMode,
    pub storage_mode: StorageMode,
    pub pic_struct: PicStruct,
    pub output_role: OutputRole,
    pub position: Position,
    pub crc: u32,
}

impl Default for InfoDecode {
    fn default() -> Self {
        Self {
            dim: Dimension::default(),
            crop: CropInfo::default(),
            bit_depth_y: 8,
            bit_depth_c: 8,
            chroma: ChromaMode::Yuv420,
            storage_mode: StorageMode::Raster,
            pic_struct: PicStruct::Frame,
            output_role: OutputRole::Main,
            position: Position::default(),
            crc: 0,
        }
    }
}
